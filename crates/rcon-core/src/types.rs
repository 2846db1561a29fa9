//! Shared value types

use std::fmt;

/// Terminal dimensions negotiated through `pty-req` / `window-change`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PtyDimensions {
    /// Width in characters
    pub cols: u32,
    /// Height in characters
    pub rows: u32,
    /// Width in pixels
    pub pixel_width: u32,
    /// Height in pixels
    pub pixel_height: u32,
}

impl PtyDimensions {
    pub fn new(cols: u32, rows: u32, pixel_width: u32, pixel_height: u32) -> Self {
        Self {
            cols,
            rows,
            pixel_width,
            pixel_height,
        }
    }

    /// Clamp to the 16-bit range a pseudo-terminal can represent
    pub fn as_u16(&self) -> (u16, u16, u16, u16) {
        fn clamp(v: u32) -> u16 {
            v.min(u16::MAX as u32) as u16
        }
        (
            clamp(self.cols),
            clamp(self.rows),
            clamp(self.pixel_width),
            clamp(self.pixel_height),
        )
    }
}

impl fmt::Display for PtyDimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Exit code reported in an `exit-status` channel request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub u32);

impl ExitCode {
    /// Map a process status code; `None` when the status is unknown
    /// (for example the process was terminated by a signal).
    pub fn from_status_code(code: Option<i32>) -> Option<Self> {
        code.map(|c| Self(c as u32))
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
