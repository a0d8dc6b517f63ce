//! pgvector text representation. Vectors travel as `'[1,2,3]'` and are cast with
//! `$n::text::vector` so no pgvector-specific sqlx type is needed.

use crate::{Error, Result};

pub fn vector_to_pg(vec: &[f32]) -> String {
	let mut out = String::with_capacity(vec.len() * 8);

	out.push('[');

	for (i, value) in vec.iter().enumerate() {
		if i > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}

pub fn parse_pg_vector(text: &str) -> Result<Vec<f32>> {
	let trimmed = text.trim();
	let without_brackets = trimmed
		.strip_prefix('[')
		.and_then(|s| s.strip_suffix(']'))
		.ok_or_else(|| Error::InvalidArgument("Vector text is not bracketed.".to_string()))?;

	if without_brackets.trim().is_empty() {
		return Ok(Vec::new());
	}

	without_brackets
		.split(',')
		.map(|part| {
			part.trim().parse::<f32>().map_err(|_| {
				Error::InvalidArgument("Vector text contains a non-numeric value.".to_string())
			})
		})
		.collect()
}

pub(crate) fn check_finite(vec: &[f32]) -> Result<()> {
	if vec.iter().any(|value| !value.is_finite()) {
		return Err(Error::InvalidArgument("Vector contains a non-finite value.".to_string()));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use crate::vector::{parse_pg_vector, vector_to_pg};

	#[test]
	fn renders_and_parses_pg_text() {
		let text = vector_to_pg(&[0.5, -1.0, 2.25]);

		assert_eq!(text, "[0.5,-1,2.25]");
		assert_eq!(parse_pg_vector(&text).expect("Vector must parse."), vec![0.5, -1.0, 2.25]);
		assert!(parse_pg_vector("0.5,1").is_err());
		assert!(parse_pg_vector("[]").expect("Empty vector must parse.").is_empty());
	}
}
