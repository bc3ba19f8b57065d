//! Value formatting: the format-spec mini-language used by `FORMAT_VALUE` and `str.format`,
//! and `%`-interpolation of strings.

use std::str::FromStr;

use crate::{
    exception_private::{ExcType, RunResult},
    resource::check_sequence_len,
    types::collect_items,
    value::{float_repr, Value},
};

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FormatSpec {
    pub fill: char,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub zero_pad: bool,
    pub width: usize,
    pub grouping: bool,
    pub precision: Option<usize>,
    pub type_char: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: None,
            zero_pad: false,
            width: 0,
            grouping: false,
            precision: None,
            type_char: None,
        }
    }
}

fn take_digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
        digits.push(c);
        chars.next();
    }
    digits.parse().ok()
}

impl FormatSpec {
    /// Width and precision both size the output, so both count against the sequence cap.
    fn check_size(&self) -> RunResult<()> {
        check_sequence_len(self.width)?;
        check_sequence_len(self.precision.unwrap_or(0))?;
        Ok(())
    }
}

impl FromStr for FormatSpec {
    type Err = String;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let mut result = Self::default();
        let mut chars = spec.chars().peekable();
        let mut lookahead = spec.chars();
        let first = lookahead.next();
        let second = lookahead.next();

        if matches!(second, Some('<' | '>' | '^' | '=')) {
            result.fill = first.unwrap_or(' ');
            chars.next();
            result.align = chars.next();
        } else if matches!(first, Some('<' | '>' | '^' | '=')) {
            result.align = chars.next();
        }
        if matches!(chars.peek(), Some('+' | '-' | ' ')) {
            result.sign = chars.next();
        }
        if chars.peek() == Some(&'0') {
            result.zero_pad = true;
            chars.next();
        }
        if let Some(width) = take_digits(&mut chars) {
            result.width = width;
        }
        if chars.peek() == Some(&',') {
            result.grouping = true;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            result.precision = Some(take_digits(&mut chars).ok_or_else(|| spec.to_owned())?);
        }
        if let Some(c) = chars.next() {
            if !matches!(c, 's' | 'd' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 'b' | 'o' | 'x' | 'X' | 'c') {
                return Err(spec.to_owned());
            }
            result.type_char = Some(c);
        }
        if chars.next().is_some() {
            return Err(spec.to_owned());
        }
        Ok(result)
    }
}

/// Parses a spec string, raising `ValueError` for malformed specs.
pub(crate) fn parse_spec(spec: &str) -> RunResult<FormatSpec> {
    spec.parse()
        .map_err(|spec: String| ExcType::ValueError.msg(format!("Invalid format specifier '{spec}'")))
}

/// `format(value, spec)` for builtin values.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn format_with_spec(value: &Value, spec: &FormatSpec) -> RunResult<String> {
    spec.check_size()?;
    let unknown = |c: char| {
        ExcType::ValueError.msg(format!(
            "Unknown format code '{c}' for object of type '{}'",
            value.type_name()
        ))
    };
    match (value, spec.type_char) {
        (Value::Int(n), None | Some('d')) => Ok(format_int(*n, spec)),
        (Value::Bool(b), Some('d')) => Ok(format_int(i64::from(*b), spec)),
        (Value::Int(n), Some(base @ ('b' | 'o' | 'x' | 'X'))) => Ok(format_int_base(*n, base, spec)),
        (Value::Int(n), Some('c')) => {
            let c = u32::try_from(*n)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| ExcType::OverflowError.msg("%c arg not in range(0x110000)"))?;
            Ok(pad(&c.to_string(), spec, '<'))
        }
        (Value::Int(n), Some(c @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%'))) => format_float(*n as f64, c, spec),
        (Value::Float(f), Some(c @ ('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%'))) => format_float(*f, c, spec),
        (Value::Float(f), None) => match spec.precision {
            Some(_) => format_float(*f, 'g', spec),
            None => Ok(sign_and_pad(float_repr(f.abs()), *f < 0.0, spec)),
        },
        (Value::Str(s), None | Some('s')) => {
            if spec.align == Some('=') {
                return Err(ExcType::ValueError.msg("'=' alignment not allowed in string format specifier"));
            }
            let text: String = match spec.precision {
                Some(precision) => s.chars().take(precision).collect(),
                None => s.to_string(),
            };
            Ok(pad(&text, spec, '<'))
        }
        (_, None) => Ok(pad(&value.py_str(), spec, '<')),
        (_, Some(c)) => Err(unknown(c)),
    }
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = digits.split_at(digits.find('.').unwrap_or(digits.len()));
    let mut grouped = String::new();
    for (index, c) in int_part.chars().enumerate() {
        if index > 0 && (int_part.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    grouped.push_str(rest);
    grouped
}

fn format_int(n: i64, spec: &FormatSpec) -> String {
    let mut digits = n.unsigned_abs().to_string();
    if spec.grouping {
        digits = group_thousands(&digits);
    }
    sign_and_pad(digits, n < 0, spec)
}

fn format_int_base(n: i64, base: char, spec: &FormatSpec) -> String {
    let abs = n.unsigned_abs();
    let digits = match base {
        'b' => format!("{abs:b}"),
        'o' => format!("{abs:o}"),
        'x' => format!("{abs:x}"),
        _ => format!("{abs:X}"),
    };
    sign_and_pad(digits, n < 0, spec)
}

fn format_float(f: f64, type_char: char, spec: &FormatSpec) -> RunResult<String> {
    let precision = spec.precision.unwrap_or(6);
    let negative = f.is_sign_negative() && !f.is_nan();
    let abs = f.abs();
    let mut digits = if abs.is_nan() || abs.is_infinite() {
        let text = if abs.is_nan() { "nan" } else { "inf" };
        if type_char.is_ascii_uppercase() {
            text.to_uppercase()
        } else {
            text.to_owned()
        }
    } else {
        match type_char {
            'f' | 'F' => format!("{abs:.precision$}"),
            'e' | 'E' => {
                let text = exponent_form(&format!("{abs:.precision$e}"));
                if type_char == 'E' {
                    text.to_uppercase()
                } else {
                    text
                }
            }
            '%' => format!("{:.precision$}%", abs * 100.0),
            _ => general_form(abs, precision.max(1), type_char == 'G'),
        }
    };
    if spec.grouping && matches!(type_char, 'f' | 'F') {
        digits = group_thousands(&digits);
    }
    Ok(sign_and_pad(digits, negative, spec))
}

/// Rewrites Rust's `1.5e3` exponent as Python's `1.5e+03`.
fn exponent_form(text: &str) -> String {
    let Some((mantissa, exp)) = text.split_once('e') else {
        return text.to_owned();
    };
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exp),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn general_form(abs: f64, precision: usize, upper: bool) -> String {
    let exponent = if abs == 0.0 { 0 } else { abs.log10().floor() as i64 };
    let text = if exponent < -4 || exponent >= precision as i64 {
        let digits = precision - 1;
        let text = format!("{abs:.digits$e}");
        let (mantissa, exp) = text.split_once('e').unwrap_or((text.as_str(), "0"));
        exponent_form(&format!("{}e{exp}", strip_zeros(mantissa)))
    } else {
        let decimals = usize::try_from(precision as i64 - 1 - exponent).unwrap_or(0);
        strip_zeros(&format!("{abs:.decimals$}"))
    };
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

fn strip_zeros(text: &str) -> String {
    if !text.contains('.') {
        return text.to_owned();
    }
    text.trim_end_matches('0').trim_end_matches('.').to_owned()
}

fn sign_and_pad(digits: String, negative: bool, spec: &FormatSpec) -> String {
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            Some('+') => "+",
            Some(' ') => " ",
            _ => "",
        }
    };
    if spec.zero_pad || spec.align == Some('=') {
        let fill = if spec.zero_pad && spec.align.is_none() { '0' } else { spec.fill };
        let len = sign.len() + digits.chars().count();
        let padding: String = std::iter::repeat(fill).take(spec.width.saturating_sub(len)).collect();
        format!("{sign}{padding}{digits}")
    } else {
        pad(&format!("{sign}{digits}"), spec, '>')
    }
}

fn pad(value: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = value.chars().count();
    if spec.width <= len {
        return value.to_owned();
    }
    let padding = spec.width - len;
    let fill = |n: usize| std::iter::repeat(spec.fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{value}{}", fill(padding)),
        '^' => format!("{}{value}{}", fill(padding / 2), fill(padding - padding / 2)),
        _ => format!("{}{value}", fill(padding)),
    }
}

/// `template % args` with the `%s %r %d %i %f %e %g %x %o %c %%` conversions.
pub(crate) fn percent_format(template: &str, args: &Value) -> RunResult<String> {
    let values = match args {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut values = values.into_iter();
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec_text = String::new();
        while let Some(&next) = chars.peek() {
            if matches!(next, '-' | '+' | ' ' | '0' | '.') || next.is_ascii_digit() {
                spec_text.push(next);
                chars.next();
            } else {
                break;
            }
        }
        let Some(conversion) = chars.next() else {
            return Err(ExcType::ValueError.msg("incomplete format"));
        };
        if conversion == '%' {
            out.push('%');
            continue;
        }
        let value = values
            .next()
            .ok_or_else(|| ExcType::TypeError.msg("not enough arguments for format string"))?;
        let mut spec = FormatSpec::default();
        let mut flags = spec_text.chars().peekable();
        while let Some(&flag) = flags.peek() {
            match flag {
                '-' => spec.align = Some('<'),
                '+' | ' ' => spec.sign = Some(flag),
                '0' => spec.zero_pad = true,
                _ => break,
            }
            flags.next();
        }
        if let Some(width) = take_digits(&mut flags) {
            spec.width = width;
        }
        if flags.next() == Some('.') {
            spec.precision = Some(take_digits(&mut flags).unwrap_or(0));
        }
        if spec.align == Some('<') {
            spec.zero_pad = false;
        }
        spec.check_size()?;
        let text = match conversion {
            's' => pad(&value.py_str(), &spec, '>'),
            'r' => pad(&value.py_repr(), &spec, '>'),
            'd' | 'i' | 'u' => {
                let n = match value.as_number() {
                    Some(number) => number_to_int(number.as_f64()),
                    None => {
                        return Err(ExcType::TypeError.msg(format!(
                            "%{conversion} format: a number is required, not {}",
                            value.type_name()
                        )))
                    }
                };
                spec.precision = None;
                format_int(n, &spec)
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' | 'x' | 'X' | 'o' | 'c' => {
                spec.type_char = Some(conversion);
                let value = match (&value, conversion) {
                    (Value::Float(f), 'x' | 'X' | 'o' | 'c') => Value::Int(number_to_int(*f)),
                    _ => value,
                };
                format_with_spec(&value, &spec)?
            }
            other => {
                return Err(ExcType::ValueError.msg(format!("unsupported format character '{other}'")));
            }
        };
        out.push_str(&text);
    }
    if values.next().is_some() {
        return Err(ExcType::TypeError.msg("not all arguments converted during string formatting"));
    }
    Ok(out)
}

#[allow(clippy::cast_possible_truncation)]
fn number_to_int(f: f64) -> i64 {
    f.trunc() as i64
}

/// `str.format(*args, **kwargs)`: `{}`, `{0}`, `{name}`, `!r`/`!s` conversions and format specs.
pub(crate) fn str_format(template: &str, args: &[Value], kwargs: &[(std::rc::Rc<str>, Value)]) -> RunResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut auto_index = 0usize;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(ExcType::ValueError.msg("Single '}' encountered in format string")),
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(ExcType::ValueError.msg("expected '}' before end of string")),
                    }
                }
                let (name, spec) = field.split_once(':').unwrap_or((&field, ""));
                let (name, conversion) = match name.split_once('!') {
                    Some((name, conversion)) => (name, Some(conversion)),
                    None => (name, None),
                };
                let value = if name.is_empty() {
                    let value = args.get(auto_index).cloned();
                    auto_index += 1;
                    value.ok_or_else(|| {
                        ExcType::IndexError.msg(format!("Replacement index {} out of range", auto_index - 1))
                    })?
                } else if let Ok(index) = name.parse::<usize>() {
                    args.get(index)
                        .cloned()
                        .ok_or_else(|| ExcType::IndexError.msg(format!("Replacement index {index} out of range")))?
                } else {
                    kwargs
                        .iter()
                        .find(|(key, _)| &**key == name)
                        .map(|(_, value)| value.clone())
                        .ok_or_else(|| ExcType::KeyError.msg(name))?
                };
                let value = match conversion {
                    None => value,
                    Some("s") => Value::from(value.py_str()),
                    Some("r") => Value::from(value.py_repr()),
                    Some(other) => {
                        return Err(ExcType::ValueError.msg(format!(
                            "Unknown conversion specifier {other}"
                        )))
                    }
                };
                out.push_str(&format_with_spec(&value, &parse_spec(spec)?)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Joins the string form of every item with `sep`, as `str.join` does.
pub(crate) fn join(sep: &str, iterable: &Value) -> RunResult<String> {
    let items = collect_items(iterable)?;
    let mut parts = Vec::with_capacity(items.len());
    let mut total = 0_usize;
    for (index, item) in items.iter().enumerate() {
        match item {
            Value::Str(s) => {
                total = check_sequence_len(total.saturating_add(s.len()).saturating_add(sep.len()))?;
                parts.push(s.to_string());
            }
            other => {
                return Err(ExcType::TypeError.msg(format!(
                    "sequence item {index}: expected str instance, {} found",
                    other.type_name()
                )))
            }
        }
    }
    Ok(parts.join(sep))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: Value, spec: &str) -> String {
        format_with_spec(&value, &parse_spec(spec).unwrap()).unwrap()
    }

    #[test]
    fn numbers_with_specs() {
        assert_eq!(fmt(Value::Float(3.14159), ".2f"), "3.14");
        assert_eq!(fmt(Value::Int(42), "05d"), "00042");
        assert_eq!(fmt(Value::Int(42), ">+6"), "   +42");
        assert_eq!(fmt(Value::Int(1_234_567), ","), "1,234,567");
        assert_eq!(fmt(Value::Int(255), "x"), "ff");
        assert_eq!(fmt(Value::Float(0.5), ".1%"), "50.0%");
        assert_eq!(fmt(Value::Float(1234.5), "e"), "1.234500e+03");
        assert_eq!(fmt(Value::Float(0.5), "g"), "0.5");
        assert_eq!(fmt(Value::Float(2.5), ""), "2.5");
    }

    #[test]
    fn strings_align_left_by_default() {
        assert_eq!(fmt(Value::from("ab"), "5"), "ab   ");
        assert_eq!(fmt(Value::from("ab"), "*^6"), "**ab**");
        assert_eq!(fmt(Value::from("abcdef"), ".3"), "abc");
    }

    #[test]
    fn invalid_specs_are_value_errors() {
        assert!(parse_spec("q").is_err());
        let err = format_with_spec(&Value::from("a"), &parse_spec("d").unwrap()).unwrap_err();
        assert!(err.to_string().contains("Unknown format code 'd' for object of type 'str'"));
    }

    #[test]
    fn percent_interpolation() {
        let args = Value::tuple(vec![Value::from("x"), Value::Int(3), Value::Float(1.5)]);
        assert_eq!(percent_format("%s=%d (%.2f) 100%%", &args).unwrap(), "x=3 (1.50) 100%");
        assert_eq!(percent_format("%r", &Value::from("a")).unwrap(), "'a'");
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
    }

    #[test]
    fn str_format_fields() {
        let args = [Value::Int(1), Value::from("b")];
        let kwargs = [(std::rc::Rc::from("n"), Value::Float(0.3))];
        assert_eq!(str_format("{} {} {n:.1f} {{}}", &args, &kwargs).unwrap(), "1 b 0.3 {}");
        assert_eq!(str_format("{1!r}-{0:>3}", &args, &[]).unwrap(), "'b'-  1");
    }
}
