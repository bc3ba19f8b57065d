//! Implementation of the print() builtin function.

use crate::{
    args::ArgValues,
    exception_private::{ExcType, RunResult},
    io::PrintWriter,
    value::Value,
};

/// Writes each argument's `str()` separated by `sep` and terminated by `end`.
///
/// `flush` is accepted and ignored; `file` is not supported since scripts have no file objects.
pub(super) fn builtin_print(writer: &mut dyn PrintWriter, args: ArgValues) -> RunResult<Value> {
    let mut args = args;
    let sep = text_kwarg(args.take_kwarg("sep"), " ", "sep")?;
    let end = text_kwarg(args.take_kwarg("end"), "\n", "end")?;
    args.take_kwarg("flush");
    if args.take_kwarg("file").is_some() {
        return Err(ExcType::TypeError.msg("print() argument 'file' is not supported"));
    }
    let (positional, kwargs) = args.into_parts();
    if let Some((key, _)) = kwargs.first() {
        return Err(ExcType::type_error_unexpected_keyword("print", key));
    }

    for (index, value) in positional.iter().enumerate() {
        if index > 0 {
            writer.stdout_push_str(&sep);
        }
        writer.stdout_write(value.py_str().into());
    }
    writer.stdout_push_str(&end);
    Ok(Value::None)
}

fn text_kwarg(value: Option<Value>, default: &str, name: &str) -> RunResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_owned()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(ExcType::TypeError.msg(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::CollectStringPrint;

    #[test]
    fn separators_and_terminator() {
        let mut writer = CollectStringPrint::new();
        let args = ArgValues::new(
            vec![Value::Int(1), Value::from("a"), Value::None],
            vec![("sep".into(), Value::from(", ")), ("end".into(), Value::from("!\n"))],
        );
        builtin_print(&mut writer, args).unwrap();
        builtin_print(&mut writer, ArgValues::default()).unwrap();
        assert_eq!(writer.output(), "1, a, None!\n\n");
    }

    #[test]
    fn file_is_rejected() {
        let mut writer = CollectStringPrint::new();
        let args = ArgValues::new(vec![], vec![("file".into(), Value::None)]);
        assert!(builtin_print(&mut writer, args).is_err());
    }
}
