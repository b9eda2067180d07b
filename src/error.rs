//! Error types for GPU initialization and rendering.
//!
//! Everything in here is fatal at initialization: an incomplete render target
//! or a shader program that fails to compile/link means the GPU resources are
//! unusable and there is no recovery path. Per-frame rendering only fails when
//! the backend itself fails (surface loss, readback mapping).

use std::fmt;

use crate::oit::TargetStatus;

/// Errors produced while creating or driving the renderer.
#[derive(Debug)]
pub enum RenderError {
    /// No GPU adapter matched the request.
    Adapter(String),
    /// The logical device could not be created.
    Device(String),
    /// The window surface could not be created or acquired.
    Surface(String),
    /// A render target's attachments were rejected.
    TargetIncomplete {
        /// Debug label of the target.
        label: String,
        /// Why the target is not usable.
        status: TargetStatus,
    },
    /// A shader module or its pipeline failed validation.
    ShaderLink {
        /// Debug label of the program.
        label: String,
        /// Diagnostic reported by the backend.
        message: String,
    },
    /// Mapping a readback buffer failed.
    Readback(String),
    /// Writing a captured target to disk failed.
    Capture(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Adapter(msg) => write!(f, "no suitable GPU adapter: {}", msg),
            RenderError::Device(msg) => write!(f, "failed to create device: {}", msg),
            RenderError::Surface(msg) => write!(f, "surface error: {}", msg),
            RenderError::TargetIncomplete { label, status } => {
                write!(f, "render target '{}' is incomplete: {}", label, status)
            }
            RenderError::ShaderLink { label, message } => {
                write!(f, "failed to link program '{}': {}", label, message)
            }
            RenderError::Readback(msg) => write!(f, "readback failed: {}", msg),
            RenderError::Capture(msg) => write!(f, "capture failed: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<wgpu::BufferAsyncError> for RenderError {
    fn from(e: wgpu::BufferAsyncError) -> Self {
        RenderError::Readback(e.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(e: image::ImageError) -> Self {
        RenderError::Capture(e.to_string())
    }
}

/// RAII guard around a wgpu validation error scope.
///
/// Pushes the scope on creation. Call [`ErrorScope::finish`] to pop it and
/// learn whether anything inside failed. A guard dropped without `finish`
/// still pops its scope so the device's scope stack stays balanced.
pub(crate) struct ErrorScope<'a> {
    device: &'a wgpu::Device,
    label: &'a str,
    finished: bool,
}

impl<'a> ErrorScope<'a> {
    pub(crate) fn push(device: &'a wgpu::Device, label: &'a str) -> Self {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        Self {
            device,
            label,
            finished: false,
        }
    }

    /// Pops the scope, returning the backend's diagnostic if validation failed.
    pub(crate) fn finish(mut self) -> Result<(), String> {
        self.finished = true;
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => {
                log::error!(target: "oit", "validation error in '{}': {}", self.label, err);
                Err(err.to_string())
            }
            None => Ok(()),
        }
    }
}

impl Drop for ErrorScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            log::error!(target: "oit", "error scope '{}' dropped without being checked", self.label);
            let _ = pollster::block_on(self.device.pop_error_scope());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_target() {
        let err = RenderError::TargetIncomplete {
            label: "Peel Target 1".to_string(),
            status: TargetStatus::ZeroExtent,
        };
        let text = err.to_string();
        assert!(text.contains("Peel Target 1"));
        assert!(text.contains("zero"));
    }

    #[test]
    fn display_carries_link_diagnostic() {
        let err = RenderError::ShaderLink {
            label: "Peel Program".to_string(),
            message: "unknown identifier `prev_depth`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to link program 'Peel Program': unknown identifier `prev_depth`"
        );
    }
}
