//! HGG/LGG 分级分类器训练入口.
//!
//! 数据来源可以是原始 BraTS 2018 训练目录 (`--layout raw`, 含 `HGG/` 与 `LGG/`),
//! 也可以是 `brats-convert cache` 生成的 npz 病例目录 (`--layout npz`).

use std::path::PathBuf;

use anyhow::Context;
use brats_berry::dataset::{BratsFolder, NpzCaseFolder};
use brats_berry::train::{train, EpochRecord, RunConfig};
use clap::{Parser, ValueEnum};
use log::info;
use utils::loader;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Layout {
    /// Raw BraTS 2018 tree with HGG/ and LGG/.
    Raw,
    /// Preprocessed npz case folder.
    Npz,
}

#[derive(Parser, Debug)]
#[command(name = "brats-train", about = "Train the HGG/LGG grade classifier")]
struct Cli {
    /// Dataset folder. Defaults to $BRATS_TRAIN_DIR or $HOME/dataset/BraTS_2018/train.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Layout of the dataset folder.
    #[arg(long, value_enum, default_value_t = Layout::Raw)]
    layout: Layout,

    /// Folder for logs, checkpoints and the loss plot.
    #[arg(long, short, default_value = "results")]
    output: PathBuf,

    #[arg(long, default_value_t = 100)]
    epochs: usize,

    /// Initial learning rate.
    #[arg(long, default_value_t = 1e-3)]
    lr: f64,

    #[arg(long, default_value_t = 5)]
    batch_size: usize,

    /// Fold used for validation.
    #[arg(long, default_value_t = 0)]
    fold: usize,

    #[arg(long, default_value_t = 5)]
    n_folds: usize,

    /// Edge length of the square 2D patch.
    #[arg(long, default_value_t = 128)]
    patch_size: usize,

    /// Positive class weight. Defaults to #HGG / #LGG of the training split.
    #[arg(long)]
    pos_weight: Option<f32>,

    /// Number of worker threads. Defaults to all cores.
    #[arg(long)]
    threads: Option<usize>,

    /// Run one epoch with a single batch per phase.
    #[arg(long)]
    dry_run: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print debug logs.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        RunConfig {
            output: self.output.clone(),
            epochs: self.epochs,
            learning_rate: self.lr,
            batch_size: self.batch_size,
            n_folds: self.n_folds,
            fold: self.fold,
            patch_size: (self.patch_size, self.patch_size),
            pos_weight: self.pos_weight,
            seed: self.seed,
            dry_run: self.dry_run,
            ..RunConfig::default()
        }
    }
}

fn summary(history: &[EpochRecord]) {
    utils::sep();
    let best = history
        .iter()
        .min_by(|a, b| a.valid.loss.total_cmp(&b.valid.loss));
    if let Some(r) = best {
        info!(
            "best epoch {}: validation loss {:.4}, accuracy {:.4}, f1 {:.4}",
            r.epoch, r.valid.loss, r.valid.metrics.accuracy, r.valid.metrics.f1
        );
    }
    info!("{} epoch(s) finished", history.len());
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::init_logger(cli.verbose);
    let threads = utils::init_threads(cli.threads)?;
    info!("using {threads} thread(s)");

    let root = cli
        .data_root
        .clone()
        .unwrap_or_else(loader::train_dir_from_env_or_home);
    let cfg = cli.run_config();
    info!("training on {} ({:?})", root.display(), cli.layout);

    let history = match cli.layout {
        Layout::Raw => {
            let source = BratsFolder::scan(&root)
                .with_context(|| format!("cannot scan {}", root.display()))?;
            train(source, cfg)?
        }
        Layout::Npz => {
            let source = NpzCaseFolder::open(&root)
                .with_context(|| format!("cannot open {}", root.display()))?;
            train(source, cfg)?
        }
    };
    summary(&history);
    Ok(())
}
