use std::fmt::{self, Write};

/// Quote a string for container display, escaping quotes and backslashes.
pub(crate) fn quote_str(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
	f.write_char('"')?;
	for c in s.chars() {
		match c {
			'"' => f.write_str("\\\"")?,
			'\\' => f.write_str("\\\\")?,
			'\n' => f.write_str("\\n")?,
			'\t' => f.write_str("\\t")?,
			c => f.write_char(c)?,
		}
	}
	f.write_char('"')
}

/// Check whether an object key can be displayed without quoting.
pub(crate) fn is_bare_key(s: &str) -> bool {
	!s.is_empty()
		&& s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
		&& !s.starts_with(|c: char| c.is_ascii_digit())
}

/// Write an object key, quoting it only when necessary.
pub(crate) fn write_key(f: &mut fmt::Formatter, s: &str) -> fmt::Result {
	if is_bare_key(s) {
		f.write_str(s)
	} else {
		quote_str(f, s)
	}
}
