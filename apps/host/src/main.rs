//! # Dashan Host
//!
//! 宿主进程：打开串口，启动控制器，把标准输入的每一行交给控制器，遥测以 JSON 行写到标准输出。
//!
//! ```bash
//! dashan-host --port /dev/ttyUSB0
//! {"command":"set_state","params":{"state":"LISTEN"}}
//! wake
//! 今天好开心
//! ```
//!
//! - 以 `{` 开头的行按远程命令解析
//! - `wake` 模拟唤醒词
//! - 其余行作为一次语音识别结果

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::{bounded, select, unbounded};
use dashan_core::{
    CoreError, DialogueEngine, RobotConfig, RobotController, RobotControllerBuilder, TelemetrySink,
    TelemetryUpdate,
};
use dashan_link::{SerialLink, available_ports};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Dashan 机器人宿主进程
#[derive(Parser, Debug)]
#[command(name = "dashan-host")]
#[command(about = "Dashan robot host: serial link, behaviour loops and JSON-lines remote relay", long_about = None)]
#[command(version)]
struct Args {
    /// TOML 配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 串口设备（覆盖配置文件）
    #[arg(short, long)]
    port: Option<String>,

    /// 波特率（覆盖配置文件）
    #[arg(short, long)]
    baud: Option<u32>,

    /// 空闲超时（秒）
    #[arg(long)]
    idle_timeout: Option<f64>,

    /// 日志级别或过滤表达式（RUST_LOG 优先）
    #[arg(long)]
    log_level: Option<String>,

    /// 列出可用串口后退出
    #[arg(long)]
    list_ports: bool,

    /// 以复述作为回复（无对话服务时调试用）
    #[arg(long)]
    echo: bool,
}

/// 遥测写到标准输出
struct StdoutTelemetry;

impl TelemetrySink for StdoutTelemetry {
    fn publish(&self, update: TelemetryUpdate) {
        println!("{}", update.to_json());
    }
}

struct EchoDialogue;

impl DialogueEngine for EchoDialogue {
    fn respond(&self, text: &str) -> String {
        text.to_string()
    }
}

fn load_config(args: &Args) -> Result<RobotConfig> {
    let mut config = match &args.config {
        Some(path) => RobotConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RobotConfig::default(),
    };
    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(idle_timeout) = args.idle_timeout {
        config.behavior.idle_timeout_s = idle_timeout;
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn select_port(config: &RobotConfig) -> Result<String> {
    if let Some(port) = &config.serial.port {
        return Ok(port.clone());
    }
    let ports = available_ports().context("enumerating serial ports")?;
    match ports.into_iter().next() {
        Some(port) => {
            info!("No port configured, using {}", port);
            Ok(port)
        },
        None => bail!("no serial port found; pass --port"),
    }
}

fn handle_line(controller: &RobotController, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let result = if line.starts_with('{') {
        controller.handle_remote_json(line)
    } else if line.eq_ignore_ascii_case("wake") {
        controller.wake().map(|_| ())
    } else {
        controller.handle_utterance(line)
    };
    match result {
        Ok(()) => {},
        Err(e @ CoreError::InvalidStateTransition { .. }) => {
            warn!("Ignored in {}: {}", controller.state(), e)
        },
        Err(e) => warn!("{}", e),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.list_ports {
        for port in available_ports().context("enumerating serial ports")? {
            println!("{}", port);
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    dashan_core::logging::init(&config.logging.level);

    let port = select_port(&config)?;
    let link = SerialLink::open(&port, config.serial.baud, config.read_timeout())
        .with_context(|| format!("opening {}", port))?;
    info!("Opened {} at {} baud", port, config.serial.baud);

    let mut builder = RobotControllerBuilder::new(config).with_telemetry(Arc::new(StdoutTelemetry));
    if args.echo {
        builder = builder.with_dialogue(Arc::new(EchoDialogue));
    }
    let controller = builder.build(link).context("starting controller")?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("installing Ctrl-C handler")?;

    // 标准输入读取在独立线程中阻塞
    let (line_tx, line_rx) = unbounded::<String>();
    std::thread::Builder::new()
        .name("dashan-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if line_tx.send(line).is_err() {
                            break;
                        }
                    },
                    Err(e) => {
                        warn!("stdin read failed: {}", e);
                        break;
                    },
                }
            }
        })
        .context("spawning stdin reader")?;

    info!("Ready. Press Ctrl+C to stop.");
    loop {
        select! {
            recv(stop_rx) -> _ => {
                info!("Received interrupt signal, shutting down");
                break;
            },
            recv(line_rx) -> line => match line {
                Ok(line) => handle_line(&controller, &line),
                // 标准输入结束，继续运行直到 Ctrl-C
                Err(_) => {
                    let _ = stop_rx.recv();
                    break;
                },
            },
        }
    }

    controller.shutdown();
    Ok(())
}
