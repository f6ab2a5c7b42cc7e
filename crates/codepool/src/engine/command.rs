//! In-sandbox command construction

use crate::config::Language;

/// Quote an argument for a POSIX shell
pub(crate) fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Build the exec command for a staged script
///
/// The language's run command is applied to the script path and its
/// standard input is redirected from the staged input, so programs can read
/// input normally although the exec is not interactive. `exec` replaces the
/// wrapping shell, leaving the program as the exec's only process.
pub(crate) fn build_exec_command(
    language: &Language,
    script_path: &str,
    stdin_path: &str,
) -> Vec<String> {
    let argv = Language::expand_command(&language.command, script_path);
    let line = argv
        .iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ");

    vec![
        "sh".to_owned(),
        "-c".to_owned(),
        format!("exec {line} < {}", shell_quote(stdin_path)),
    ]
}
