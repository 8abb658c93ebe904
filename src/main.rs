use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use lanenet_trainer::{
    NetFlag, RunOutcome,
    checkpoint::SafetensorsCheckpointer,
    config::{DeviceList, RunPaths, TrainConfig},
    data::{Split, TusimpleFeeder},
    model::LinearProbe,
    summary::{JsonlSummaryWriter, SummarySink},
    training::{
        InitPolicy, MultiDeviceTrainer, SingleDeviceTrainer, TrainerParts, timestamped_model_name,
    },
};
use log::{info, warn};

/// Trains LaneNet on the TuSimple dataset.
#[derive(Debug, Parser)]
#[command(name = "train_lanenet", version, about)]
struct Args {
    /// The dataset directory holding `train.txt` and `val.txt`.
    #[arg(short = 'd', long)]
    dataset_dir: PathBuf,

    /// Prior weights to start from.
    #[arg(short = 'w', long)]
    weights_path: Option<PathBuf>,

    /// Trains one replica per visible device.
    #[arg(short = 'm', long)]
    multi_gpus: bool,

    #[arg(long, value_enum, default_value_t = NetFlag::Vgg)]
    net_flag: NetFlag,

    /// Suffix of the run's output directories.
    #[arg(long, default_value = "")]
    version_flag: String,

    /// Only reads the parameters from the prior weights, leaving the optimizer
    /// state and the global step fresh.
    #[arg(long)]
    scratch: bool,

    /// A JSON training configuration, every missing field keeps it's default.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Where the `model`, `tboard` and `tmp` directories are created.
    #[arg(long, default_value = ".")]
    output_root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => TrainConfig::load(path)
            .with_context(|| format!("failed to load the configuration {}", path.display()))?,
        None => TrainConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.train.seed = seed;
    }
    config.validate()?;

    let devices = DeviceList::from_env();
    info!("{}: {}", DeviceList::ENV_VAR, devices.ids().join(","));

    let multi = args.multi_gpus && devices.supports_multi();
    if args.multi_gpus && !multi {
        warn!("multi-device training needs at least two devices, training on a single one");
    }

    let dump = config.to_pretty_json()?;
    info!("Global configuration is as follows:");
    info!("{dump}");

    let paths = RunPaths::new(&args.output_root, args.net_flag, &args.version_flag);
    paths.create()?;

    let train = &config.train;
    let size = train.image_size();
    let train_feeder = TusimpleFeeder::open(&args.dataset_dir, Split::Train, size, train.seed)?;
    let val_feeder = TusimpleFeeder::open(&args.dataset_dir, Split::Val, size, train.seed)?;

    let mut model = LinearProbe::new(args.net_flag, train.embedding_dims.get());
    if let Some(width) = config.probe.trunk_width {
        model = model.with_width(width.get());
    }

    let checkpoints = SafetensorsCheckpointer::new(&paths.model_dir, train.max_to_keep.get())?;
    let mut summaries = JsonlSummaryWriter::new(&paths.tboard_dir)?;
    summaries.add_text("config", &dump, 0)?;

    let parts = TrainerParts {
        model,
        train_feeder: Box::new(train_feeder),
        val_feeder: Box::new(val_feeder),
        checkpoints: Box::new(checkpoints),
        summaries: Box::new(summaries),
    };
    let init = InitPolicy::new(args.weights_path, args.scratch);

    let outcome = if multi {
        let model_name = timestamped_model_name(args.net_flag.as_str());
        let mut trainer = MultiDeviceTrainer::new(&config, parts, &init, model_name, devices.len())?;
        trainer.run()?
    } else {
        let mut trainer = SingleDeviceTrainer::new(&config, parts, &init)?;
        if config.train.record_intermediate {
            trainer = trainer.with_intermediate_dir(paths.tmp_dir.clone());
        }
        trainer.run()?
    };

    match outcome {
        RunOutcome::Completed => info!("training finished"),
        RunOutcome::Diverged { step } => warn!("training stopped at step {step}, the loss diverged"),
    }

    Ok(())
}
