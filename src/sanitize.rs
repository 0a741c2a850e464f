//! Transcript line cleanup.
//!
//! Captured sessions pass through terminal programs that leave colour codes,
//! cursor movement and stray control bytes in the log. Matching runs on the
//! printable text only.

#[derive(Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    /// Just saw ESC.
    Start,
    /// Inside `ESC [ ...`, waiting for a final byte.
    Csi,
    /// Inside `ESC ] ...` or `ESC P ...`, waiting for BEL or ST.
    String,
    /// Saw ESC inside a string sequence; `\` ends it.
    StringEsc,
}

/// Remove escape sequences and every control character except tab.
pub fn sanitize_line(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut state = Escape::None;

    for c in line.chars() {
        state = match state {
            Escape::None => {
                if c == '\x1b' {
                    Escape::Start
                } else {
                    if c == '\t' || !c.is_control() {
                        out.push(c);
                    }
                    Escape::None
                }
            }
            Escape::Start => match c {
                '[' => Escape::Csi,
                ']' | 'P' => Escape::String,
                // Two-byte sequences (`ESC =`, `ESC 7`, ...) end here.
                _ => Escape::None,
            },
            Escape::Csi => {
                if ('\x40'..='\x7e').contains(&c) {
                    Escape::None
                } else {
                    Escape::Csi
                }
            }
            Escape::String => match c {
                '\x07' => Escape::None,
                '\x1b' => Escape::StringEsc,
                _ => Escape::String,
            },
            Escape::StringEsc => {
                if c == '\\' {
                    Escape::None
                } else {
                    Escape::String
                }
            }
        };
    }
    out
}
