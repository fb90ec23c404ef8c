use std::io::{IsTerminal, Write};
use std::net::SocketAddr;

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use iobridge_config::BoardConfig;
use iobridge_core::Status;
use iobridge_frame::route_name;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A decoded reply as the `send` command reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyView {
    pub route: u8,
    /// Echoed command ID; absent for custom-space replies.
    pub command: Option<u8>,
    pub result: Vec<u8>,
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    route: u8,
    route_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<u8>,
    result_len: usize,
    result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
}

pub fn print_reply(reply: &ReplyView, format: OutputFormat) {
    let status = status_hint(reply);
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                route: reply.route,
                route_name: route_name(reply.route),
                command: reply.command,
                result_len: reply.result.len(),
                result: hex_string(&reply.result),
                status,
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ROUTE", "COMMAND", "LEN", "RESULT", "STATUS"])
                .add_row(vec![
                    route_label(reply.route),
                    reply
                        .command
                        .map(|c| format!("0x{c:02X}"))
                        .unwrap_or_else(|| "-".to_string()),
                    reply.result.len().to_string(),
                    hex_string(&reply.result),
                    status.unwrap_or("-").to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let command = reply
                .command
                .map(|c| format!(" command=0x{c:02X}"))
                .unwrap_or_default();
            println!(
                "route={}{} len={} result={}{}",
                route_label(reply.route),
                command,
                reply.result.len(),
                hex_string(&reply.result),
                status.map(|s| format!(" status={s}")).unwrap_or_default()
            );
        }
        OutputFormat::Raw => print_raw(&reply.result),
    }
}

#[derive(Serialize)]
struct BoardRow<'a> {
    name: &'a str,
    digital_pins: u8,
    analog_pins: u8,
    pwm_pins: &'a [u8],
    i2c_buses: u8,
    spi_buses: u8,
    sci_ports: usize,
    adc_resolution_bits: u8,
}

pub fn print_boards<'a>(boards: impl Iterator<Item = &'a BoardConfig>, format: OutputFormat) {
    let rows: Vec<BoardRow<'_>> = boards
        .map(|b| BoardRow {
            name: &b.name,
            digital_pins: b.digital_pins,
            analog_pins: b.analog_pins,
            pwm_pins: &b.pwm_pins,
            i2c_buses: b.i2c_buses,
            spi_buses: b.spi_buses,
            sci_ports: b.sci_slots(),
            adc_resolution_bits: b.adc_resolution_bits,
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "BOARD", "DIGITAL", "ANALOG", "PWM", "I2C", "SPI", "SCI", "ADC BITS",
                ]);
            for row in &rows {
                table.add_row(vec![
                    row.name.to_string(),
                    row.digital_pins.to_string(),
                    row.analog_pins.to_string(),
                    row.pwm_pins.len().to_string(),
                    row.i2c_buses.to_string(),
                    row.spi_buses.to_string(),
                    row.sci_ports.to_string(),
                    row.adc_resolution_bits.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for row in &rows {
                println!(
                    "{} digital={} analog={} pwm={} i2c={} spi={} sci={} adc_bits={}",
                    row.name,
                    row.digital_pins,
                    row.analog_pins,
                    row.pwm_pins.len(),
                    row.i2c_buses,
                    row.spi_buses,
                    row.sci_ports,
                    row.adc_resolution_bits
                );
            }
        }
    }
}

#[derive(Serialize)]
struct ListeningOutput<'a> {
    event: &'a str,
    addr: String,
    board: &'a str,
    libraries: &'a [&'a str],
}

/// Announce the bound address. Flushed so a parent process can read it
/// before the server loop starts.
pub fn print_listening(addr: SocketAddr, board: &str, libraries: &[&str], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ListeningOutput {
            event: "listening",
            addr: addr.to_string(),
            board,
            libraries,
        }),
        _ => println!("listening on {addr} (board {board}, {} libraries)", libraries.len()),
    }
    let _ = std::io::stdout().flush();
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn route_label(route: u8) -> String {
    match route_name(route) {
        "LIBRARY" => format!("LIBRARY {route}"),
        name => name.to_string(),
    }
}

/// A one-byte result on a standard or server route is usually a status.
fn status_hint(reply: &ReplyView) -> Option<&'static str> {
    match (reply.command, reply.result.as_slice()) {
        (Some(_), [byte]) => Status::from_u8(*byte).map(Status::name),
        _ => None,
    }
}

pub fn hex_string(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
