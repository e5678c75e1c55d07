//! Launch command rewriting. A wrapped command is `"<tool>" --run "<game>"`.

/// File stem of this tool's executable, used to recognise wrapped commands.
pub const TOOL_STEM: &str = env!("CARGO_PKG_NAME");
pub const RUN_FLAG: &str = "--run";

/// True when the leading token of `exe` is this tool's executable.
pub fn is_wrapped(exe: &str) -> bool {
    leading_token(exe).is_some_and(|(token, _)| is_tool_token(token))
}

/// Game path of a wrapped command, quotes stripped, original spelling kept.
pub fn extract_original_raw(exe: &str) -> Option<String> {
    let (tool, rest) = leading_token(exe)?;
    if !is_tool_token(tool) {
        return None;
    }
    let (flag, rest) = leading_token(rest)?;
    if flag != RUN_FLAG {
        return None;
    }
    let (game, _) = leading_token(rest)?;
    if game.trim().is_empty() {
        return None;
    }
    Some(game.to_string())
}

/// Normalised, lower-cased game path of a wrapped command.
pub fn extract_original(exe: &str) -> Option<String> {
    extract_original_raw(exe).map(|raw| normalize_path(&raw))
}

pub fn build_wrapped(tool_path: &str, game_path: &str) -> String {
    format!(
        "\"{}\" {RUN_FLAG} \"{}\"",
        unquote(tool_path),
        unquote(game_path)
    )
}

/// The executable a shortcut launches: the wrapped game when wrapped,
/// otherwise the command itself with quotes removed.
pub fn target_executable(exe: &str) -> Option<String> {
    if is_wrapped(exe) {
        return extract_original_raw(exe);
    }
    let unquoted = unquote(exe);
    if unquoted.is_empty() {
        None
    } else {
        Some(unquoted.to_string())
    }
}

pub fn unquote(raw: &str) -> &str {
    raw.trim().trim_matches('"')
}

pub fn quote(path: &str) -> String {
    format!("\"{}\"", unquote(path))
}

/// Directory part of a path written with either separator style.
pub fn parent_dir(path: &str) -> Option<&str> {
    let path = unquote(path);
    let idx = path.rfind(['/', '\\'])?;
    if idx == 0 {
        return Some(&path[..1]);
    }
    Some(&path[..idx])
}

/// File name without extension, for either separator style.
pub fn file_stem(path: &str) -> &str {
    let path = unquote(path);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Lexically normalises a path for comparison: quotes stripped, forward
/// slashes, `.` and `..` folded, lower-cased.
pub fn normalize_path(raw: &str) -> String {
    let unified = unquote(raw).replace('\\', "/");
    let absolute = unified.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." && !last.ends_with(':') => {
                    parts.pop();
                }
                Some(last) if last.ends_with(':') => {}
                _ if absolute => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    let normalized = if absolute {
        format!("/{joined}")
    } else {
        joined
    };
    normalized.to_lowercase()
}

fn is_tool_token(token: &str) -> bool {
    file_stem(token).eq_ignore_ascii_case(TOOL_STEM)
}

/// Splits off the first token, honouring one level of double quotes.
fn leading_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    if let Some(quoted) = input.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some((&quoted[..end], &quoted[end + 1..]));
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}
