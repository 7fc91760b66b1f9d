use crate::exp::part::Part;
use std::fmt;
use std::ops::Deref;

/// An owned list of path segments. The display form, dot-joined with
/// `[]` for indices, is the key under which sequence locks register.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct Path(pub Vec<Part>);

impl Deref for Path {
	type Target = [Part];
	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl From<Vec<Part>> for Path {
	fn from(v: Vec<Part>) -> Self {
		Self(v)
	}
}

impl From<&str> for Path {
	fn from(v: &str) -> Self {
		Self(v.split('.').filter(|s| !s.is_empty()).map(Part::from).collect())
	}
}

impl FromIterator<Part> for Path {
	fn from_iter<I: IntoIterator<Item = Part>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

impl fmt::Display for Path {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		for (i, part) in self.0.iter().enumerate() {
			match part {
				Part::Field(v) if i == 0 => write!(f, "{v}")?,
				part => write!(f, "{part}")?,
			}
		}
		Ok(())
	}
}
