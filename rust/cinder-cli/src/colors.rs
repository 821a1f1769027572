//! Terminal colors. Disabled when `NO_COLOR` is set or stderr is not a
//! terminal, so piped output stays plain.

use std::io::IsTerminal;
use std::sync::OnceLock;

use cinder_compiler::diagnostics::Diagnostic;

fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED
        .get_or_init(|| std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal())
}

fn paint(sgr: &str, text: &str, on: bool) -> String {
    if on {
        format!("\x1b[{}m{}\x1b[0m", sgr, text)
    } else {
        text.to_string()
    }
}

pub fn green(s: &str) -> String {
    paint("32", s, enabled())
}

pub fn red(s: &str) -> String {
    paint("31", s, enabled())
}

pub fn yellow(s: &str) -> String {
    paint("33", s, enabled())
}

pub fn cyan(s: &str) -> String {
    paint("36", s, enabled())
}

pub fn bold(s: &str) -> String {
    paint("1", s, enabled())
}

pub fn gray(s: &str) -> String {
    paint("90", s, enabled())
}

/// Right-aligned bold green label, cargo style.
pub fn status_label(label: &str) -> String {
    paint("1;32", &format!("{:>12}", label), enabled())
}

pub fn diagnostic(d: &Diagnostic) -> String {
    if enabled() {
        d.render_ansi()
    } else {
        d.render_plain()
    }
}

#[cfg(test)]
mod tests {
    use super::paint;

    #[test]
    fn paint_wraps_only_when_enabled() {
        assert_eq!(paint("31", "x", true), "\x1b[31mx\x1b[0m");
        assert_eq!(paint("31", "x", false), "x");
    }
}
