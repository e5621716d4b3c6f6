//! `sbx check`: report which required external programs are installed.

use sbx_runtime::REQUIRED_PROGRAMS;

use crate::cli::OutputFormat;
use crate::error::{Result, SbxError};

pub fn run(format: OutputFormat) -> Result<()> {
	let mut missing = Vec::new();
	let mut found = Vec::new();

	for program in REQUIRED_PROGRAMS {
		match which::which(program) {
			Ok(path) => found.push((program, path)),
			Err(_) => missing.push(program),
		}
	}

	match format {
		OutputFormat::Json => {
			let value = serde_json::json!({
				"ok": missing.is_empty(),
				"found": found
					.iter()
					.map(|(program, path)| {
						serde_json::json!({ "program": program, "path": path.display().to_string() })
					})
					.collect::<Vec<_>>(),
				"missing": missing,
			});
			println!("{value}");
		}
		OutputFormat::Text => {
			for (program, path) in &found {
				println!("ok      {program} ({})", path.display());
			}
			for program in &missing {
				println!("missing {program}");
			}
		}
	}

	if missing.is_empty() {
		Ok(())
	} else {
		Err(SbxError::MissingDependencies(missing.join(", ")))
	}
}
