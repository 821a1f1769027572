//! Library builtins: formatted output, math and string helpers.

use cinder_compiler::compiler::lir::Builtin;

use super::{Vm, VmError};
use crate::values::Value;

/// Execute a builtin. Returns the value it pushes, if any.
pub(crate) fn call(
    vm: &mut Vm,
    builtin: Builtin,
    args: &[Value],
) -> Result<Option<Value>, VmError> {
    let arg = |i: usize| -> Result<Value, VmError> {
        args.get(i)
            .copied()
            .ok_or_else(|| VmError::Runtime(format!("too few arguments to '{}'", builtin.name())))
    };
    let result = match builtin {
        Builtin::Printf => {
            let fmt = vm.read_c_string(arg(0)?)?;
            let text = format_printf(vm, &fmt, &args[1..])?;
            vm.write_output(&text);
            Value::Int(text.len() as i64)
        }
        Builtin::Puts => {
            let s = vm.read_c_string(arg(0)?)?;
            vm.write_output(&s);
            vm.write_output("\n");
            Value::Int(0)
        }
        Builtin::Putchar => {
            let c = arg(0)?.as_i64() as u8;
            vm.write_output(&char::from(c).to_string());
            Value::Int(c as i64)
        }
        Builtin::Abs => Value::Int((arg(0)?.as_i64() as i32).wrapping_abs() as i64),
        Builtin::Labs => Value::Int(arg(0)?.as_i64().wrapping_abs()),
        Builtin::Fabs => Value::Float(arg(0)?.as_f64().abs()),
        Builtin::Sqrt => Value::Float(arg(0)?.as_f64().sqrt()),
        Builtin::Pow => Value::Float(arg(0)?.as_f64().powf(arg(1)?.as_f64())),
        Builtin::Floor => Value::Float(arg(0)?.as_f64().floor()),
        Builtin::Ceil => Value::Float(arg(0)?.as_f64().ceil()),
        Builtin::Strlen => Value::Int(vm.read_c_string(arg(0)?)?.len() as i64),
        Builtin::Eval | Builtin::PrintValue | Builtin::SetResult => {
            return Err(VmError::Runtime(format!("'{}' is not a library function", builtin.name())));
        }
    };
    Ok(Some(result))
}

// ── printf ──

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    /// Length modifier: 0 = none, -1 = h, -2 = hh, 1 = l or longer.
    length: i8,
}

/// Formats `fmt` the way C's `printf` does.
pub fn format_printf(vm: &Vm, fmt: &str, args: &[Value]) -> Result<String, VmError> {
    let mut out = String::new();
    let mut next = args.iter().copied();
    let mut take = || {
        next.next().ok_or_else(|| VmError::Runtime("too few arguments for format string".into()))
    };
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.left = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alt = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        if chars.peek() == Some(&'*') {
            chars.next();
            let w = take()?.as_i64();
            spec.left |= w < 0;
            spec.width = w.unsigned_abs() as usize;
        } else {
            spec.width = read_number(&mut chars);
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            if chars.peek() == Some(&'*') {
                chars.next();
                let p = take()?.as_i64();
                spec.precision = (p >= 0).then_some(p as usize);
            } else {
                spec.precision = Some(read_number(&mut chars));
            }
        }
        while let Some(&m) = chars.peek() {
            match m {
                'h' => spec.length = if spec.length == -1 { -2 } else { -1 },
                'l' | 'q' | 'j' | 'z' | 't' | 'L' => spec.length = 1,
                _ => break,
            }
            chars.next();
        }
        let Some(conv) = chars.next() else {
            out.push('%');
            break;
        };
        match conv {
            '%' => out.push('%'),
            'd' | 'i' => {
                let v = truncate_signed(take()?.as_i64(), spec.length);
                let sign = if v < 0 {
                    "-"
                } else if spec.plus {
                    "+"
                } else if spec.space {
                    " "
                } else {
                    ""
                };
                let digits = with_precision(v.unsigned_abs().to_string(), spec.precision);
                out.push_str(&pad(&spec, sign, &digits, spec.precision.is_none()));
            }
            'u' | 'x' | 'X' | 'o' => {
                let v = truncate_unsigned(take()?.as_bits(), spec.length);
                let digits = match conv {
                    'u' => v.to_string(),
                    'x' => format!("{:x}", v),
                    'X' => format!("{:X}", v),
                    _ => format!("{:o}", v),
                };
                let digits = with_precision(digits, spec.precision);
                let prefix = match conv {
                    'x' if spec.alt && v != 0 => "0x",
                    'X' if spec.alt && v != 0 => "0X",
                    'o' if spec.alt && !digits.starts_with('0') => "0",
                    _ => "",
                };
                out.push_str(&pad(&spec, prefix, &digits, spec.precision.is_none()));
            }
            'c' => {
                let c = char::from(take()?.as_i64() as u8);
                out.push_str(&pad(&spec, "", &c.to_string(), false));
            }
            's' => {
                let ptr = take()?;
                let mut s = if ptr.as_bits() == 0 {
                    "(null)".to_string()
                } else {
                    vm.read_c_string(ptr)?
                };
                if let Some(p) = spec.precision {
                    s = s.chars().take(p).collect();
                }
                out.push_str(&pad(&spec, "", &s, false));
            }
            'p' => {
                let bits = take()?.as_bits();
                let body = if bits == 0 { "(nil)".to_string() } else { format!("0x{:x}", bits) };
                out.push_str(&pad(&spec, "", &body, false));
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let v = take()?.as_f64();
                let sign = if v.is_sign_negative() && !v.is_nan() {
                    "-"
                } else if spec.plus {
                    "+"
                } else if spec.space {
                    " "
                } else {
                    ""
                };
                let body = format_float(v.abs(), conv, &spec);
                let body = if conv.is_ascii_uppercase() { body.to_uppercase() } else { body };
                out.push_str(&pad(&spec, sign, &body, v.is_finite()));
            }
            other => {
                let message = format!("unsupported conversion '%{}' in format string", other);
                return Err(VmError::Runtime(message));
            }
        }
    }
    Ok(out)
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n.saturating_mul(10).saturating_add(d as usize);
        chars.next();
    }
    n
}

fn truncate_signed(v: i64, length: i8) -> i64 {
    match length {
        -2 => v as i8 as i64,
        -1 => v as i16 as i64,
        0 => v as i32 as i64,
        _ => v,
    }
}

fn truncate_unsigned(v: u64, length: i8) -> u64 {
    match length {
        -2 => v as u8 as u64,
        -1 => v as u16 as u64,
        0 => v as u32 as u64,
        _ => v,
    }
}

fn with_precision(digits: String, precision: Option<usize>) -> String {
    match precision {
        Some(0) if digits == "0" => String::new(),
        Some(p) if digits.len() < p => format!("{}{}", "0".repeat(p - digits.len()), digits),
        _ => digits,
    }
}

fn pad(spec: &Spec, prefix: &str, body: &str, zero_ok: bool) -> String {
    let len = prefix.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{}{}", prefix, body);
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{}{}{}", prefix, body, " ".repeat(fill))
    } else if spec.zero && zero_ok {
        format!("{}{}{}", prefix, "0".repeat(fill), body)
    } else {
        format!("{}{}{}", " ".repeat(fill), prefix, body)
    }
}

/// Formats a non-negative float for `%f`, `%e` or `%g`.
fn format_float(v: f64, conv: char, spec: &Spec) -> String {
    if v.is_nan() {
        return "nan".into();
    }
    if v.is_infinite() {
        return "inf".into();
    }
    let precision = spec.precision.unwrap_or(6);
    match conv.to_ascii_lowercase() {
        'f' => {
            let s = format!("{:.*}", precision, v);
            if spec.alt && precision == 0 { format!("{}.", s) } else { s }
        }
        'e' => exponent_form(v, precision),
        _ => {
            let p = if precision == 0 { 1 } else { precision };
            let exp = exponent_of(v, p - 1);
            let s = if exp < -4 || exp >= p as i32 {
                exponent_form(v, p - 1)
            } else {
                format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, v)
            };
            if spec.alt { s } else { strip_trailing_zeros(&s) }
        }
    }
}

/// Decimal exponent of `v` once rounded to `precision` fraction digits.
fn exponent_of(v: f64, precision: usize) -> i32 {
    let s = format!("{:.*e}", precision, v);
    s.rsplit('e').next().and_then(|e| e.parse().ok()).unwrap_or(0)
}

/// `d.ddde+XX` with at least two exponent digits.
fn exponent_form(v: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => s,
    }
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find('e') {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(f: &str, args: &[Value]) -> String {
        format_printf(&Vm::new(), f, args).unwrap()
    }

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| Value::Int(*v)).collect()
    }

    #[test]
    fn integers_honour_width_flags_and_length() {
        assert_eq!(fmt("%d|%5d|%-5d|%05d", &ints(&[42, 42, 42, -42])), "42|   42|42   |-0042");
        assert_eq!(fmt("%+d %u", &ints(&[7, -1])), "+7 4294967295");
        assert_eq!(fmt("%ld", &[Value::Int(1 << 40)]), "1099511627776");
        assert_eq!(fmt("%#x %X %o %.3d", &ints(&[255, 255, 8, 5])), "0xff FF 10 005");
    }

    #[test]
    fn floats_follow_c_conventions() {
        assert_eq!(fmt("%f", &[Value::Float(1.5)]), "1.500000");
        assert_eq!(fmt("%.2f", &[Value::Float(3.14159)]), "3.14");
        assert_eq!(fmt("%e", &[Value::Float(12345.678)]), "1.234568e+04");
        let small_and_large = [Value::Float(0.0001), Value::Float(1e-5), Value::Float(100.0)];
        assert_eq!(fmt("%g %g %g", &small_and_large), "0.0001 1e-05 100");
        assert_eq!(fmt("%8.3f|", &[Value::Float(-2.5)]), "  -2.500|");
    }

    #[test]
    fn percent_and_char_conversions() {
        assert_eq!(fmt("100%% %c%c", &ints(&[b'o' as i64, b'k' as i64])), "100% ok");
        assert_eq!(fmt("%p %s", &[Value::Ptr(0), Value::Ptr(0)]), "(nil) (null)");
    }

    #[test]
    fn missing_arguments_are_an_error() {
        assert!(format_printf(&Vm::new(), "%d %d", &[Value::Int(1)]).is_err());
    }
}
