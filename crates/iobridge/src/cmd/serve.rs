use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use iobridge_config::{read_board_file, BoardConfig, CatalogConfig};
use iobridge_core::sim::SimBoard;
use iobridge_core::IoServerBuilder;
use iobridge_transport::TcpTransport;

use crate::cmd::{parse_duration, ServeArgs};
use crate::exit::{
    config_error, core_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS,
};
use crate::output::{print_listening, OutputFormat};

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let board_config = resolve_board(&args)?;
    let rate = args.rate.as_deref().map(parse_duration).transpose()?;

    let transport =
        TcpTransport::bind(args.bind.clone()).map_err(|err| transport_error("bind failed", err))?;
    let addr = transport
        .local_addr()
        .ok_or_else(|| CliError::new(INTERNAL, "listener has no local address"))?;

    let board = SimBoard::new(&board_config);
    let board_name = board_config.name.clone();
    let mut server = IoServerBuilder::new(board_config)
        .build(transport, board.clone(), board.interrupts())
        .map_err(|err| core_error("server setup failed", err))?;

    if let Some(period) = rate {
        server
            .scheduler_mut()
            .configure(period.as_secs_f64())
            .map_err(|err| core_error("scheduler setup failed", err))?;
    }

    print_listening(addr, &board_name, &server.library_names(), format);

    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&shutdown))?;

    tracing::info!(%addr, board = %board_name, "serving simulated board");
    server
        .run(&shutdown)
        .map_err(|err| core_error("server stopped", err))?;
    Ok(SUCCESS)
}

fn resolve_board(args: &ServeArgs) -> CliResult<BoardConfig> {
    match &args.board_file {
        Some(path) => read_board_file(path, CatalogConfig::default().max_board_file_size)
            .map_err(|err| config_error(&format!("failed loading {}", path.display()), err)),
        None => BoardConfig::preset(&args.board).map_err(|err| config_error("board", err)),
    }
}

fn install_ctrlc_handler(shutdown: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::exit::{DATA_INVALID, USAGE};

    fn args(board: &str, board_file: Option<PathBuf>) -> ServeArgs {
        ServeArgs {
            bind: "127.0.0.1:0".into(),
            board: board.into(),
            board_file,
            rate: None,
        }
    }

    #[test]
    fn preset_board_resolves() {
        let board = resolve_board(&args("mega2560", None)).unwrap();
        assert_eq!(board.name, "mega2560");
    }

    #[test]
    fn unknown_preset_is_usage_error() {
        let err = resolve_board(&args("pdp11", None)).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn missing_board_file_is_data_error() {
        let missing = PathBuf::from(format!(
            "/tmp/iobridge-missing-{}.board.json",
            std::process::id()
        ));
        let err = resolve_board(&args("uno", Some(missing))).unwrap_err();
        assert_eq!(err.code, DATA_INVALID);
    }
}
