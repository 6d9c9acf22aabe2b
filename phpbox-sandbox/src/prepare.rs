//! Turning raw snippets into runnable PHP units

use serde::{Deserialize, Serialize};

/// Opening tag every prepared unit carries. Short open tags are not recognised.
pub const START_MARKER: &str = "<?php";

/// Closing tag
pub const END_MARKER: &str = "?>";

/// Makes the child interpreter report every notice and warning
pub const DIAGNOSTICS_DIRECTIVE: &str =
    "ini_set('display_errors', '1'); error_reporting(E_ALL);";

/// Makes a script delete its own file once it has run
pub const SELF_DESTRUCT_DIRECTIVE: &str = "unlink(__FILE__);";

/// What to inject while preparing a snippet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareOptions {
    /// Insert [`DIAGNOSTICS_DIRECTIVE`] right after the start marker
    pub diagnostics: bool,
    /// Insert [`SELF_DESTRUCT_DIRECTIVE`] before the end marker (or at the end)
    pub self_destruct: bool,
}

impl PrepareOptions {
    pub fn plain() -> Self {
        Self::default()
    }

    pub fn with_diagnostics() -> Self {
        Self {
            diagnostics: true,
            self_destruct: false,
        }
    }

    pub fn with_self_destruct() -> Self {
        Self {
            diagnostics: false,
            self_destruct: true,
        }
    }
}

/// A snippet ready to be handed to the interpreter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedUnit {
    code: String,
    options: PrepareOptions,
}

impl PreparedUnit {
    pub fn as_str(&self) -> &str {
        &self.code
    }

    pub fn options(&self) -> PrepareOptions {
        self.options
    }
}

impl AsRef<str> for PreparedUnit {
    fn as_ref(&self) -> &str {
        &self.code
    }
}

impl std::fmt::Display for PreparedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

/// Normalise `snippet` into a runnable unit.
///
/// Whitespace is trimmed only at the splice points; everything else is kept
/// verbatim.
pub fn prepare(snippet: &str, options: PrepareOptions) -> PreparedUnit {
    let mut code = match snippet.find(START_MARKER) {
        None => {
            let mut code = String::with_capacity(snippet.len() + 64);
            code.push_str(START_MARKER);
            code.push(' ');
            if options.diagnostics {
                code.push_str(DIAGNOSTICS_DIRECTIVE);
                code.push(' ');
            }
            code.push_str(php_trim(snippet));
            code
        }
        Some(pos) => {
            let (head, body) = snippet.split_at(pos + START_MARKER.len());
            let mut code = String::with_capacity(snippet.len() + 64);
            code.push_str(php_trim(head));
            if options.diagnostics {
                code.push(' ');
                code.push_str(DIAGNOSTICS_DIRECTIVE);
            }
            code.push(' ');
            code.push_str(php_trim(body));
            code
        }
    };

    if options.self_destruct {
        code = match code.find(END_MARKER) {
            Some(pos) => {
                let (body, tail) = code.split_at(pos);
                format!(
                    "{} {} {}",
                    php_trim(body),
                    SELF_DESTRUCT_DIRECTIVE,
                    php_trim(tail)
                )
            }
            None => format!("{} {}", php_trim(&code), SELF_DESTRUCT_DIRECTIVE),
        };
    }

    PreparedUnit { code, options }
}

/// Trim the characters PHP's `trim()` strips by default
fn php_trim(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r' | '\0' | '\x0B'))
}
