/// Returns `true` if the given character is any valid directory separator.
#[inline]
fn is_path_separator(c: char) -> bool {
    matches!(c, '\\' | '/')
}

/// Lower-cases a path character and maps both separators onto `/`.
fn fold_path_char(c: char) -> impl Iterator<Item = char> {
    let c = if is_path_separator(c) { '/' } else { c };
    c.to_lowercase()
}

/// Compares two source paths for equality, ignoring case and the flavor of directory separators.
///
/// Documents recorded by compilers on Windows use backslashes, while breakpoint requests may come
/// from tools using forward slashes. This comparison treats both as the same separator. It is an
/// exact comparison otherwise: a path never matches one of its suffixes.
///
/// # Examples
///
/// ```
/// use clrdbg_common::paths_equal_ignore_case;
///
/// assert!(paths_equal_ignore_case("C:\\src\\Program.cs", "c:/src/program.cs"));
/// assert!(!paths_equal_ignore_case("test/program.cs", "blah/test/program.cs"));
/// assert!(!paths_equal_ignore_case("Program.cs", "MyProgram.cs"));
/// ```
pub fn paths_equal_ignore_case(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(fold_path_char)
        .eq(b.chars().flat_map(fold_path_char))
}

/// Splits off the last component of a path.
///
/// Both slashes and backslashes are treated as separators. Trailing separators are ignored.
///
/// # Examples
///
/// ```
/// use clrdbg_common::split_path;
///
/// assert_eq!(split_path("/a/b/c"), (Some("/a/b"), "c"));
/// assert_eq!(split_path("C:\\a\\b"), (Some("C:\\a"), "b"));
/// assert_eq!(split_path("Program.cs"), (None, "Program.cs"));
/// ```
pub fn split_path(path: &str) -> (Option<&str>, &str) {
    let path = path.trim_end_matches(is_path_separator);
    let path = if path.is_empty() { "/" } else { path };

    match path.rfind(is_path_separator) {
        Some(0) => (Some(&path[..1]), &path[1..]),
        Some(pos) => (Some(&path[..pos]), &path[pos + 1..]),
        None => (None, path),
    }
}

/// Returns the file name of a path, which is its last component.
///
/// ```
/// assert_eq!(clrdbg_common::file_name("C:\\src\\Program.cs"), "Program.cs");
/// ```
pub fn file_name(path: &str) -> &str {
    split_path(path).1
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_paths_equal_ignore_case() {
        assert!(paths_equal_ignore_case("Program.cs", "program.cs"));
        assert!(paths_equal_ignore_case("test/program.cs", "TEST\\Program.CS"));
        assert!(paths_equal_ignore_case("", ""));

        assert!(!paths_equal_ignore_case("test/program.cs", "different_program.cs"));
        assert!(!paths_equal_ignore_case("test/program.cs", "blah/test/program.cs"));
        assert!(!paths_equal_ignore_case("Program.cs", "MyProgram.cs"));
        assert!(!paths_equal_ignore_case("Program.cs", "Program.cs2"));
    }

    #[test]
    fn test_paths_equal_non_ascii() {
        assert!(paths_equal_ignore_case("/src/Ärger.cs", "/SRC/ärger.cs"));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("C:\\a\\b"), (Some("C:\\a"), "b"));
        assert_eq!(split_path("C:\\a\\b\\"), (Some("C:\\a"), "b"));
        assert_eq!(split_path("/a/b/c"), (Some("/a/b"), "c"));
        assert_eq!(split_path("/a"), (Some("/"), "a"));
        assert_eq!(split_path("a"), (None, "a"));
    }
}
