//! Extraction of test code from free-form oracle responses.

use std::sync::LazyLock;

use regex::Regex;

static TEST_DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:async[ \t]+)?def[ \t]+test_\w*[ \t]*\(").unwrap());

const CODE_TAGS: &[&str] = &["", "python", "py", "python3"];

/// Returns the code carried by `response`.
///
/// Bodies of fenced blocks tagged `python`/`py` or untagged are joined with a
/// blank line. Blocks in other languages are skipped. Without any fence the
/// whole response is the code. The result is trimmed and may be empty.
pub fn extract_code(response: &str) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut saw_fence = false;
    let mut current: Option<(bool, Vec<&str>)> = None;

    for line in response.lines() {
        let trimmed = line.trim_start();
        match current.take() {
            None => {
                if let Some(tag) = trimmed.strip_prefix("```") {
                    saw_fence = true;
                    let tag = tag.trim().to_ascii_lowercase();
                    current = Some((CODE_TAGS.contains(&tag.as_str()), Vec::new()));
                }
            }
            Some((keep, mut body)) => {
                if trimmed.trim_end() == "```" {
                    if keep {
                        blocks.push(body.join("\n"));
                    }
                } else {
                    body.push(line);
                    current = Some((keep, body));
                }
            }
        }
    }
    // An unterminated block still counts.
    if let Some((true, body)) = current {
        blocks.push(body.join("\n"));
    }

    if !saw_fence {
        return response.trim().to_string();
    }
    blocks
        .iter()
        .map(|b| b.trim_matches('\n').trim_end())
        .filter(|b| !b.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Number of `def test_*` definitions in `source`.
pub fn count_tests(source: &str) -> usize {
    TEST_DEF_RE.find_iter(source).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_fence_is_unwrapped() {
        let response = "Here are the tests:\n```python\nimport pytest\n\ndef test_a():\n    assert True\n```\nDone.";
        assert_eq!(
            extract_code(response),
            "import pytest\n\ndef test_a():\n    assert True"
        );
    }

    #[test]
    fn untagged_and_py_blocks_are_joined() {
        let response = "```\ndef test_a():\n    pass\n```\ntext\n```py\ndef test_b():\n    pass\n```";
        assert_eq!(
            extract_code(response),
            "def test_a():\n    pass\n\ndef test_b():\n    pass"
        );
    }

    #[test]
    fn other_languages_are_skipped() {
        let response = "```bash\npytest -v\n```\n```python\ndef test_x():\n    pass\n```";
        assert_eq!(extract_code(response), "def test_x():\n    pass");
    }

    #[test]
    fn unfenced_text_is_trimmed() {
        assert_eq!(
            extract_code("\n\n  def test_a():\n    pass\n\n"),
            "def test_a():\n    pass"
        );
    }

    #[test]
    fn fences_without_code_yield_empty() {
        assert_eq!(extract_code("```python\n```"), "");
        assert_eq!(extract_code("```json\n{}\n```"), "");
    }

    #[test]
    fn unterminated_fence_keeps_body() {
        assert_eq!(
            extract_code("```python\ndef test_a():\n    pass\n"),
            "def test_a():\n    pass"
        );
    }

    #[test]
    fn counts_only_test_definitions() {
        let source = "def helper():\n    pass\n\ndef test_one():\n    pass\n\nclass TestX:\n    def test_two(self):\n        pass\n\n# def test_comment():\nx = 'def test_str('\n";
        assert_eq!(count_tests(source), 2);
        assert_eq!(count_tests(""), 0);
    }
}
