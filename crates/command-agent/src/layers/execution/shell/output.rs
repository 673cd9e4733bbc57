use super::stream::Captured;

const TRUNCATED_MARKER: &str = "\n[output truncated]";
const STDERR_SEPARATOR: &str = "\n----------ERROR-------\n";

/// Output recorded on the plugin: stdout, then stderr after a separator.
pub(super) fn plugin_output(stdout: &Captured, stderr: &Captured) -> String {
    let mut out = render(stdout);
    let err = render(stderr);
    if !err.is_empty() {
        out.push_str(STDERR_SEPARATOR);
        out.push_str(&err);
    }
    out
}

fn render(captured: &Captured) -> String {
    if captured.bytes.is_empty() {
        return String::new();
    }
    let mut out = String::from_utf8_lossy(&captured.bytes).into_owned();
    if captured.truncated {
        out.push_str(TRUNCATED_MARKER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn captured(text: &str, truncated: bool) -> Captured {
        Captured {
            bytes: text.as_bytes().to_vec(),
            truncated,
        }
    }

    #[test]
    fn stderr_follows_separator() {
        let out = plugin_output(&captured("ok", false), &captured("warn", false));
        assert_eq!(out, "ok\n----------ERROR-------\nwarn");
    }

    #[test]
    fn empty_stderr_adds_nothing() {
        let out = plugin_output(&captured("ok", true), &captured("", false));
        assert_eq!(out, "ok\n[output truncated]");
    }
}
