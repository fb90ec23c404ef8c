use iobridge_config::BoardCatalog;

use crate::cmd::BoardsArgs;
use crate::exit::{config_error, CliResult, SUCCESS};
use crate::output::{print_boards, OutputFormat};

pub fn run(args: BoardsArgs, format: OutputFormat) -> CliResult<i32> {
    let catalog = match &args.dir {
        Some(dir) => BoardCatalog::from_directory(dir)
            .map_err(|err| config_error(&format!("failed loading {}", dir.display()), err))?,
        None => BoardCatalog::new().map_err(|err| config_error("catalog", err))?,
    };
    tracing::debug!(count = catalog.len(), "board catalog loaded");
    print_boards(catalog.iter(), format);
    Ok(SUCCESS)
}
