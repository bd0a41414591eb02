/// Candidate Normalization
///
/// Turns raw model output into source that can run as a standalone module:
/// 1. Extract the fenced code block, if any (Python-tagged fences win)
/// 2. Re-indent the body of a leading function whose body lost its indentation
///
/// The transform is deterministic and idempotent, so already-clean source can
/// be normalized again without changing it.

use crate::error::HarnessError;

const FENCE: &str = "```";
const INDENT: &str = "    ";
const PYTHON_TAGS: [&str; 3] = ["python", "py", "python3"];

/// One fenced block located inside a response
#[derive(Debug)]
struct Fence<'a> {
    info: &'a str,
    body: &'a str,
}

impl Fence<'_> {
    fn is_python(&self) -> bool {
        PYTHON_TAGS
            .iter()
            .any(|tag| self.info.eq_ignore_ascii_case(tag))
    }
}

/// Normalize a raw candidate response into executable source.
///
/// Fails with [`HarnessError::EmptySource`] when nothing is left after the
/// code block has been extracted.
pub fn normalize_response(raw: &str) -> Result<String, HarnessError> {
    let code = extract_code(raw);
    if code.trim().is_empty() {
        return Err(HarnessError::EmptySource);
    }
    Ok(reindent_function_body(&code))
}

/// Extract the code block from a response.
///
/// Returns the interior of the first Python-tagged fence, or of the first
/// fence of any kind. An unclosed fence runs to the end of the text. Text
/// without fences passes through unchanged.
pub fn extract_code(raw: &str) -> String {
    let fences = find_fences(raw);
    let chosen = fences
        .iter()
        .find(|fence| fence.is_python())
        .or_else(|| fences.first());

    match chosen {
        Some(fence) => trim_block(fence.body).to_string(),
        None => raw.to_string(),
    }
}

/// Scan fences left to right, pairing each opening with the next closing.
fn find_fences(raw: &str) -> Vec<Fence<'_>> {
    let mut fences = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = raw[cursor..].find(FENCE) {
        let after_ticks = cursor + offset + FENCE.len();
        let line_end = raw[after_ticks..]
            .find('\n')
            .map(|i| after_ticks + i)
            .unwrap_or(raw.len());
        let info_line = &raw[after_ticks..line_end];

        // A single-token info string names the language; anything else is code
        let (info, body_start) = if !info_line.contains(FENCE)
            && !info_line.trim().contains(char::is_whitespace)
        {
            (info_line.trim(), (line_end + 1).min(raw.len()))
        } else {
            ("", after_ticks)
        };

        match raw[body_start..].find(FENCE) {
            Some(close) => {
                let body_end = body_start + close;
                fences.push(Fence {
                    info,
                    body: &raw[body_start..body_end],
                });
                cursor = body_end + FENCE.len();
            }
            None => {
                fences.push(Fence {
                    info,
                    body: &raw[body_start..],
                });
                break;
            }
        }
    }

    fences
}

/// Fence interior without surrounding whitespace
fn trim_block(body: &str) -> &str {
    body.trim()
}

fn is_function_header(line: &str) -> bool {
    let stripped = line.trim_start();
    stripped.starts_with("def ") || stripped.starts_with("async def ")
}

fn is_indented(line: &str) -> bool {
    line.starts_with(INDENT) || line.starts_with('\t')
}

/// Re-indent the body of a leading function definition.
///
/// Applies only when the first non-blank line is a `def` header. Every later
/// non-blank line that is not indented by four spaces or a tab gets one
/// indentation level; blank lines are kept as they are.
pub fn reindent_function_body(code: &str) -> String {
    let lines: Vec<&str> = code.split('\n').collect();
    let header = match lines.iter().position(|line| !line.trim().is_empty()) {
        Some(idx) if is_function_header(lines[idx]) => idx,
        _ => return code.to_string(),
    };

    let mut fixed = Vec::with_capacity(lines.len());
    for (idx, line) in lines.iter().enumerate() {
        if idx <= header || line.trim().is_empty() || is_indented(line) {
            fixed.push((*line).to_string());
        } else {
            fixed.push(format!("{}{}", INDENT, line.trim()));
        }
    }

    fixed.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "def add(a, b):\nreturn a + b",
            "Here you go:\n```python\ndef f(x):\n    return x * 2\n```\nHope it helps!",
            "```\nprint(sum(map(int, open(0))))\n```",
            "```python\ndef g():\nx = 1\n\nreturn x\n",
            "    return a + b",
            "```js\nconsole.log(1)\n```\n```python\nprint(1)\n```",
            "```py\n\n\n  indented = True\n\n```",
            "def f():\n  two_spaces()\n\tTabbed()\n",
            "import sys\n\ndef main():\n    print(sys.argv)\n\nmain()\n",
            "``` \ndef odd():\npass\n```",
            "```print('inline')```",
            "no code at all, just prose",
            "\r\ndef crlf():\r\nreturn 1\r\n",
        ]
    }

    #[test]
    fn test_fence_interior_is_returned_without_prose() {
        let raw = "Sure! Here is the solution:\n\n```python\ndef f(x):\n    return x * 2\n```\n\nThis doubles x.";
        assert_eq!(normalize_response(raw).unwrap(), "def f(x):\n    return x * 2");
    }

    #[test]
    fn test_python_fence_is_preferred_over_earlier_generic_fence() {
        let raw = "```text\nexample output\n```\n\n```python\nprint('hi')\n```";
        assert_eq!(extract_code(raw), "print('hi')");
    }

    #[test]
    fn test_python_tag_is_case_insensitive() {
        let raw = "```Python\nx = 1\n```";
        assert_eq!(extract_code(raw), "x = 1");
    }

    #[test]
    fn test_first_generic_fence_when_no_python_fence() {
        let raw = "```\nfirst = 1\n```\n```\nsecond = 2\n```";
        assert_eq!(extract_code(raw), "first = 1");
    }

    #[test]
    fn test_info_string_is_not_part_of_code() {
        let raw = "```python3\nimport math\n```";
        assert_eq!(extract_code(raw), "import math");
        let raw = "```bash\nls\n```";
        assert_eq!(extract_code(raw), "ls");
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let raw = "```python\ndef f():\n    return 1\n";
        assert_eq!(extract_code(raw), "def f():\n    return 1");
    }

    #[test]
    fn test_inline_fence() {
        assert_eq!(extract_code("```print('inline')```"), "print('inline')");
    }

    #[test]
    fn test_no_fence_passes_through_unchanged() {
        let raw = "x = int(input())\nprint(x + 1)\n";
        assert_eq!(extract_code(raw), raw);
        assert_eq!(normalize_response(raw).unwrap(), raw);
    }

    #[test]
    fn test_fence_interior_is_trimmed() {
        let raw = "```python\n\n    return a + b\n```";
        assert_eq!(normalize_response(raw).unwrap(), "return a + b");

        let raw = "Solution:\n```python\n    n = int(input())\nprint(n)\n```";
        assert_eq!(normalize_response(raw).unwrap(), "n = int(input())\nprint(n)");
    }

    #[test]
    fn test_reindent_unindented_body() {
        let raw = "def add(a, b):\nresult = a + b\n\nreturn result";
        let normalized = normalize_response(raw).unwrap();
        assert_eq!(normalized, "def add(a, b):\n    result = a + b\n\n    return result");
    }

    #[test]
    fn test_reindent_keeps_blank_lines_in_place() {
        let raw = "def f():\n\nx = 1\n\n\ny = 2\n";
        let normalized = normalize_response(raw).unwrap();
        let before: Vec<usize> = raw
            .split('\n')
            .enumerate()
            .filter(|(_, l)| l.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        let after: Vec<usize> = normalized
            .split('\n')
            .enumerate()
            .filter(|(_, l)| l.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(before, after);
        for line in normalized.split('\n').skip(1) {
            if !line.trim().is_empty() {
                assert!(line.starts_with("    "), "line not indented: {:?}", line);
            }
        }
    }

    #[test]
    fn test_reindent_leaves_indented_lines_alone() {
        let code = "def f():\n    if x:\n        return 1\n\treturn 2";
        assert_eq!(reindent_function_body(code), code);
    }

    #[test]
    fn test_reindent_normalizes_shallow_indentation() {
        let code = "def f():\n  x = 1";
        assert_eq!(reindent_function_body(code), "def f():\n    x = 1");
    }

    #[test]
    fn test_reindent_skips_non_function_sources() {
        let code = "import sys\ndef f():\nreturn 1";
        assert_eq!(reindent_function_body(code), code);
    }

    #[test]
    fn test_empty_source() {
        assert!(matches!(normalize_response(""), Err(HarnessError::EmptySource)));
        assert!(matches!(normalize_response("   \n\t"), Err(HarnessError::EmptySource)));
        assert!(matches!(
            normalize_response("Here:\n```python\n\n```"),
            Err(HarnessError::EmptySource)
        ));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in corpus() {
            let once = normalize_response(raw).unwrap();
            let twice = normalize_response(&once).unwrap();
            assert_eq!(once, twice, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_normalize_is_deterministic() {
        for raw in corpus() {
            assert_eq!(
                normalize_response(raw).unwrap(),
                normalize_response(raw).unwrap()
            );
        }
    }
}
