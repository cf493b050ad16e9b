use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Enumerated failure codes reported by the graphics layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphicsErrorCode {
    Validation,
    OutOfMemory,
    Internal,
    SurfaceUnavailable,
    AdapterUnavailable,
    DeviceRequest,
    FramebufferIncomplete,
    ShaderCompilation,
}

impl fmt::Display for GraphicsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GraphicsErrorCode::Validation => "validation",
            GraphicsErrorCode::OutOfMemory => "out-of-memory",
            GraphicsErrorCode::Internal => "internal",
            GraphicsErrorCode::SurfaceUnavailable => "surface-unavailable",
            GraphicsErrorCode::AdapterUnavailable => "adapter-unavailable",
            GraphicsErrorCode::DeviceRequest => "device-request",
            GraphicsErrorCode::FramebufferIncomplete => "framebuffer-incomplete",
            GraphicsErrorCode::ShaderCompilation => "shader-compilation",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("out of memory: {0}")]
    NoMemory(String),

    #[error("{0}")]
    General(String),

    #[error("logic error: {0}")]
    CoreLogic(String),

    #[error("io error on {path:?}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("graphics api error [{code}]: {message}")]
    GraphicsApi {
        code: GraphicsErrorCode,
        message: String,
    },
}

impl RenderError {
    pub fn general(message: impl Into<String>) -> Self {
        RenderError::General(message.into())
    }

    pub fn logic(message: impl Into<String>) -> Self {
        RenderError::CoreLogic(message.into())
    }

    pub fn graphics(code: GraphicsErrorCode, message: impl Into<String>) -> Self {
        RenderError::GraphicsApi {
            code,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        RenderError::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Maps an error captured by a wgpu error scope. `code` names what was
    /// being created so validation failures keep their context.
    pub fn from_wgpu(error: wgpu::Error, code: GraphicsErrorCode) -> Self {
        match error {
            wgpu::Error::OutOfMemory { .. } => RenderError::NoMemory(error.to_string()),
            wgpu::Error::Validation { description, .. } => RenderError::graphics(code, description),
            other => RenderError::graphics(GraphicsErrorCode::Internal, other.to_string()),
        }
    }
}

/// Errors accumulated while unwinding an initialisation call chain.
/// The innermost cause is first; each caller appends its own frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorStack {
    errors: Vec<RenderError>,
}

impl ErrorStack {
    pub fn new(root: RenderError) -> Self {
        Self { errors: vec![root] }
    }

    pub fn push(mut self, error: RenderError) -> Self {
        self.errors.push(error);
        self
    }

    pub fn root(&self) -> &RenderError {
        &self.errors[0]
    }

    pub fn errors(&self) -> &[RenderError] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn log(&self) {
        for (depth, error) in self.errors.iter().enumerate() {
            log::error!("  #{depth}: {error}");
        }
    }
}

impl fmt::Display for ErrorStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, error) in self.errors.iter().enumerate() {
            if depth > 0 {
                writeln!(f)?;
            }
            write!(f, "#{depth}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorStack {}

impl From<RenderError> for ErrorStack {
    fn from(error: RenderError) -> Self {
        ErrorStack::new(error)
    }
}

pub type RenderResult<T> = Result<T, ErrorStack>;

pub trait ResultExt<T> {
    fn context(self, error: RenderError) -> RenderResult<T>;

    fn with_context<F>(self, f: F) -> RenderResult<T>
    where
        F: FnOnce() -> RenderError;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ErrorStack>,
{
    fn context(self, error: RenderError) -> RenderResult<T> {
        self.map_err(|inner| inner.into().push(error))
    }

    fn with_context<F>(self, f: F) -> RenderResult<T>
    where
        F: FnOnce() -> RenderError,
    {
        self.map_err(|inner| inner.into().push(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_leaf() -> Result<(), RenderError> {
        Err(RenderError::graphics(
            GraphicsErrorCode::ShaderCompilation,
            "unknown identifier `albdo`",
        ))
    }

    fn failing_middle() -> RenderResult<()> {
        failing_leaf().context(RenderError::general("creating lighting pipeline"))
    }

    #[test]
    fn context_appends_frames_outward() {
        let stack = failing_middle()
            .context(RenderError::general("initializing renderer"))
            .unwrap_err();

        assert_eq!(stack.len(), 3);
        assert!(matches!(
            stack.root(),
            RenderError::GraphicsApi {
                code: GraphicsErrorCode::ShaderCompilation,
                ..
            }
        ));
        assert_eq!(
            stack.errors()[2],
            RenderError::general("initializing renderer")
        );
    }

    #[test]
    fn display_lists_every_frame() {
        let stack = ErrorStack::new(RenderError::logic("grid 0x9x24 is degenerate"))
            .push(RenderError::general("validating settings"));
        let text = stack.to_string();
        assert!(text.contains("#0: logic error: grid 0x9x24 is degenerate"));
        assert!(text.contains("#1: validating settings"));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn graphics_error_carries_code() {
        let err = RenderError::graphics(GraphicsErrorCode::FramebufferIncomplete, "0x0 target");
        assert_eq!(
            err.to_string(),
            "graphics api error [framebuffer-incomplete]: 0x0 target"
        );
    }
}
