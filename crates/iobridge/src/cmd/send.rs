use iobridge_frame::{
    CustomRequest, Packet, PacketConfig, PacketReader, PacketWriter, StandardReply,
    StandardRequest, CUSTOM, SERVER,
};
use iobridge_transport::TcpTransport;

use crate::cmd::{parse_duration, parse_hex, SendArgs};
use crate::exit::{
    frame_error, transport_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE,
};
use crate::output::{print_reply, OutputFormat, ReplyView};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = parse_hex(&args.data)?;
    let (route, body) = build_request(&args, payload)?;

    let stream = TcpTransport::connect(args.addr.as_str())
        .map_err(|err| transport_error("connect failed", err))?;
    let write_half = stream
        .try_clone()
        .map_err(|err| transport_error("connect failed", err))?;
    let config = PacketConfig {
        read_timeout: Some(timeout),
        write_timeout: Some(timeout),
        ..PacketConfig::default()
    };
    let mut writer = PacketWriter::with_config(write_half, config.clone());
    let mut reader = PacketReader::with_config_stream(stream, config)
        .map_err(|err| frame_error("connect failed", err))?;

    tracing::debug!(route, len = body.len(), "sending request");
    writer
        .send(route, &body)
        .map_err(|err| frame_error("send failed", err))?;
    let packet = reader
        .read_packet()
        .map_err(|err| frame_error("no reply", err))?;

    print_reply(&decode_reply(packet)?, format);
    Ok(SUCCESS)
}

fn build_request(args: &SendArgs, payload: Vec<u8>) -> CliResult<(u8, Vec<u8>)> {
    if let Some(id) = args.custom {
        return Ok((CUSTOM, CustomRequest::new(id, payload).to_bytes().to_vec()));
    }
    let route = match args.library {
        Some(index) => index,
        None => SERVER,
    };
    let command = args.command.ok_or_else(|| {
        CliError::new(USAGE, "--command is required for library and server requests")
    })?;
    Ok((route, StandardRequest::new(command, payload).to_bytes().to_vec()))
}

fn decode_reply(packet: Packet) -> CliResult<ReplyView> {
    if packet.route == CUSTOM {
        return Ok(ReplyView {
            route: packet.route,
            command: None,
            result: packet.body.to_vec(),
        });
    }
    let reply = StandardReply::decode(&packet.body)
        .map_err(|err| CliError::new(DATA_INVALID, format!("malformed reply: {err}")))?;
    Ok(ReplyView {
        route: packet.route,
        command: Some(reply.command),
        result: reply.result.to_vec(),
    })
}
