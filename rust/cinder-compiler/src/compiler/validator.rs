//! Cheap plausibility check run before an input is wrapped and parsed.
//!
//! Tracks delimiter nesting while skipping string and character literals
//! and comments. The REPL also uses it to decide whether to ask for a
//! continuation line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Valid = 0,
    /// An opening delimiter or a block comment is still open.
    Incomplete = 1,
    /// A closing delimiter does not match the innermost open one.
    Mismatch = 2,
    /// A string or character literal runs to the end of a line.
    UnterminatedLiteral = 3,
}

impl ValidationResult {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn describe(self) -> &'static str {
        match self {
            ValidationResult::Valid => "valid input",
            ValidationResult::Incomplete => "input is incomplete",
            ValidationResult::Mismatch => "mismatched delimiter",
            ValidationResult::UnterminatedLiteral => "unterminated literal",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, input: &str) -> ValidationResult {
        let chars: Vec<char> = input.chars().collect();
        let mut stack: Vec<char> = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            match c {
                '/' if chars.get(i + 1) == Some(&'/') => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                    continue;
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    i += 2;
                    loop {
                        if i + 1 >= chars.len() {
                            return ValidationResult::Incomplete;
                        }
                        if chars[i] == '*' && chars[i + 1] == '/' {
                            i += 2;
                            break;
                        }
                        i += 1;
                    }
                    continue;
                }
                '"' | '\'' => {
                    i += 1;
                    loop {
                        match chars.get(i) {
                            None | Some('\n') => return ValidationResult::UnterminatedLiteral,
                            Some('\\') => i += 2,
                            Some(&q) if q == c => break,
                            Some(_) => i += 1,
                        }
                    }
                }
                '(' | '[' | '{' => stack.push(c),
                ')' | ']' | '}' => {
                    let open = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    if stack.pop() != Some(open) {
                        return ValidationResult::Mismatch;
                    }
                }
                _ => {}
            }
            i += 1;
        }
        if stack.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Incomplete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(input: &str) -> ValidationResult {
        InputValidator::new().validate(input)
    }

    #[test]
    fn balanced_inputs_are_valid() {
        assert_eq!(check("int x = 5;"), ValidationResult::Valid);
        assert_eq!(check("int f(int a) { return a[0]; }"), ValidationResult::Valid);
        assert_eq!(check("puts(\"(\"); // )"), ValidationResult::Valid);
        assert_eq!(check("char c = '}';"), ValidationResult::Valid);
        assert_eq!(check("/* { */ 1"), ValidationResult::Valid);
    }

    #[test]
    fn open_delimiters_are_incomplete() {
        assert_eq!(check("int f() {"), ValidationResult::Incomplete);
        assert_eq!(check("f(1, "), ValidationResult::Incomplete);
        assert_eq!(check("/* still"), ValidationResult::Incomplete);
    }

    #[test]
    fn wrong_closers_mismatch() {
        assert_eq!(check("f(1]"), ValidationResult::Mismatch);
        assert_eq!(check("}"), ValidationResult::Mismatch);
        assert_eq!(ValidationResult::Mismatch.code(), 2);
    }

    #[test]
    fn unterminated_literals() {
        assert_eq!(check("puts(\"abc);"), ValidationResult::UnterminatedLiteral);
        assert_eq!(check("char c = 'a"), ValidationResult::UnterminatedLiteral);
        assert_eq!(check("\"esc \\\" still open"), ValidationResult::UnterminatedLiteral);
    }
}
