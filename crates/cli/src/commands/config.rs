use super::Context;
use crate::cli::ConfigAction;
use crate::error::Result;
use crate::output::{self, OutputFormat};

pub fn run(ctx: &Context, action: ConfigAction) -> Result<()> {
	match action {
		ConfigAction::Path => match ctx.format {
			OutputFormat::Json => output::print_json(&serde_json::json!({
				"path": ctx.config_path,
				"exists": ctx.config_path.exists(),
			}))?,
			OutputFormat::Text => println!("{}", ctx.config_path.display()),
		},
		ConfigAction::Show => output::print_json(&ctx.config)?,
	}
	Ok(())
}
