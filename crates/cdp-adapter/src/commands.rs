//! Command parameter types exposed by the CDP adapter interface.

use serde::{Deserialize, Serialize};

/// Target of a `<select>` change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectSpec {
    pub selector: String,
    pub value: String,
    /// Also accept an option whose visible label equals `value`.
    pub match_label: bool,
}

/// Conditions `wait_basic` can block on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WaitGate {
    /// `document.readyState` is `interactive` or `complete`.
    DomReady,
    /// The selector resolves to an element with a non-empty box that is not hidden.
    SelectorVisible { selector: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    pub format: ScreenshotFormat,
    /// Capture the whole scrollable document instead of the viewport.
    pub full_page: bool,
}

impl ScreenshotOptions {
    pub fn full_page_png() -> Self {
        Self {
            format: ScreenshotFormat::Png,
            full_page: true,
        }
    }

    pub fn viewport_jpeg(quality: u8) -> Self {
        Self {
            format: ScreenshotFormat::Jpeg {
                quality: Some(quality),
            },
            full_page: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ScreenshotFormat {
    Png,
    Jpeg { quality: Option<u8> },
}
