use std::io::{IsTerminal, Write};

use boardlink_config::NetworkSnapshot;
use boardlink_dispatch::{ErrorCode, Message};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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

#[derive(Serialize)]
struct ErrorOutput<'a> {
    code: ErrorCode,
    message: &'a str,
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    #[serde(flatten)]
    message: &'a Message,
    type_tags: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorOutput<'a>>,
}

pub fn print_reply(reply: &Message, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ReplyOutput {
                message: reply,
                type_tags: reply.type_tags(),
                error: reply
                    .as_error()
                    .map(|(code, message)| ErrorOutput { code, message }),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let args: Vec<String> = reply.args.iter().map(ToString::to_string).collect();
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ADDRESS", "TYPES", "ARGS"])
                .add_row(vec![reply.address.clone(), reply.type_tags(), args.join(" ")]);
            println!("{table}");
        }
        OutputFormat::Pretty => match reply.as_error() {
            Some((code, message)) => println!("{}: error {code}: {message}", reply.address),
            None => {
                let args: Vec<String> = reply.args.iter().map(ToString::to_string).collect();
                println!("{} = {}", reply.address, args.join(", "));
            }
        },
        OutputFormat::Raw => {
            let mut line = reply.to_bytes();
            line.push(b'\n');
            print_raw(&line);
        }
    }
}

pub fn print_snapshot(snapshot: &NetworkSnapshot, format: OutputFormat) {
    let rows = [
        ("address", snapshot.address.to_string()),
        ("mask", snapshot.mask.to_string()),
        ("gateway", snapshot.gateway.to_string()),
        ("validity", format!("{:?}", snapshot.validity).to_lowercase()),
        ("tcpout_address", snapshot.tcpout_address.to_string()),
        ("tcpout_port", snapshot.tcpout_port.to_string()),
        ("tcpout_autoconnect", snapshot.tcpout_autoconnect.to_string()),
    ];

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (field, value) in rows {
                table.add_row(vec![field.to_string(), value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (field, value) in rows {
                println!("{field}={value}");
            }
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}
