use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use std::rc::Rc;

use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{filter::LevelFilter, prelude::*};

use flow_showcase::camera::CvCamera;
use flow_showcase::config::*;
use flow_showcase::kernels::cv::CvKernels;
use flow_showcase::kernels::native::NativeKernels;
use flow_showcase::kernels::{FlowKernels, KernelsKind, Painter};
use flow_showcase::session::Session;
use flow_showcase::strategy::{StrategyFactory, StrategyKind};
use flow_showcase::visualization::{CvImageWriter, CvWindow};

const WINDOW_NAME: &str = "flow";

#[derive(Parser)]
pub struct Args {
    /// Camera device index
    #[clap(short, long, default_value = "0")]
    pub device: i32,
    /// Read frames from a video file instead of a camera
    #[clap(short, long)]
    pub input: Option<String>,
    #[clap(long, requires = "height")]
    pub width: Option<u32>,
    #[clap(long, requires = "width")]
    pub height: Option<u32>,
    #[clap(short, long)]
    pub verbose: bool,
    #[clap(flatten)]
    pub config: Config,
}

fn print_usage() {
    println!("Keys:");
    for (i, kind) in StrategyKind::ALL.iter().enumerate() {
        println!("  {}  {}", i + 1, kind.label());
    }
    println!("  s  save the raw frame and the rendered flow");
    println!("  f  toggle horizontal flip");
    println!("  ESC  quit");
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let _ = CONFIG.set(args.config.clone());
    let config = CONFIG.get().context("config is not set")?;

    // setup logging
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stdout_writer())
                .with_filter(level),
        )
        .with(indicatif_layer)
        .init();

    print_usage();

    let source = match &args.input {
        Some(path) => CvCamera::from_file(path),
        None => CvCamera::open(args.device, args.width.zip(args.height)),
    }
    .context("cannot start capture")?;
    let display = CvWindow::new(WINDOW_NAME)?;

    let (kernels, painter): (Rc<dyn FlowKernels>, Rc<dyn Painter>) = match config.kernels {
        KernelsKind::Native => {
            let native = Rc::new(NativeKernels);
            (native.clone(), native)
        }
        KernelsKind::Opencv => {
            let cv = Rc::new(CvKernels);
            (cv.clone(), cv)
        }
    };
    info!("using {:?} kernels", config.kernels);
    let factory = StrategyFactory::new(kernels, painter, config.strategy_params(), config.seed);
    let mut session = Session::new(
        source,
        display,
        CvImageWriter,
        factory,
        config.session_settings(),
    );

    let header_span = info_span!("session");
    header_span.pb_set_style(
        &ProgressStyle::with_template("{spinner} {pos} frames {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    let header_span_enter = header_span.enter();

    let result = session.run();

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    info!("{} frames rendered", session.frames());
    result
}
