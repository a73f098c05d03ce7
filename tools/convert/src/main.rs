//! BraTS 预测结果转换工具.
//!
//! 默认行为: 把 `{root}/{exp}/fold_{fold}/{train_test}` 下的预测结果转换回 BraTS 标签约定,
//! 写入 `..._brats_format` 并打包为 `{train_test}_results.zip`. 加上 `--post` 时再做后处理,
//! 写入 `..._post_brats_format` 并打包为 `{train_test}_results_post.zip`.
//!
//! 另有两个子命令:
//!
//! - `import`: 把原始 BraTS 2018 目录导入为训练框架的原始数据集布局;
//! - `cache`: 把原始 BraTS 2018 训练集预处理为 npz 病例目录, 供训练使用.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use brats_berry::archive::zip_folder;
use brats_berry::consts::MIN_ENHANCING_VOXELS;
use brats_berry::dataset::brats::import_raw_dataset;
use brats_berry::dataset::{BratsFolder, CaseSource, NpzCaseFolder};
use brats_berry::post_proc::post_process_folder;
use brats_berry::remap::{convert_folder_to_raw, ConversionReport};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use utils::loader;

#[derive(Parser, Debug)]
#[command(
    name = "brats-convert",
    about = "Convert predicted labels back to the BraTS 2018/2019 convention",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    convert: ConvertArgs,

    /// Print debug logs.
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a raw BraTS 2018 tree (HGG/, LGG/ and a test dir) into imagesTr/labelsTr/imagesTs.
    Import(ImportArgs),

    /// Preprocess the raw BraTS 2018 training set into an npz case folder.
    Cache(CacheArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// The name of experiment.
    #[arg(long)]
    exp_name: Option<String>,

    /// Train or test.
    #[arg(long = "train_test", alias = "train-test")]
    train_test: Option<String>,

    /// Folder holding the experiments. Defaults to $BRATS_RESULTS_DIR or
    /// $HOME/dataset/results/Dataset032_BraTS2018.
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Enable post-processing.
    #[arg(long)]
    post: bool,

    /// Training fold.
    #[arg(long)]
    fold: Option<String>,

    /// Number of worker threads.
    #[arg(long, default_value_t = 12)]
    workers: usize,

    /// Enhancing tumour predictions with fewer voxels than this are relabelled as necrosis.
    #[arg(long, default_value_t = MIN_ENHANCING_VOXELS)]
    min_enhancing: usize,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Raw training set containing HGG/ and LGG/. Defaults to $BRATS_TRAIN_DIR.
    #[arg(long)]
    train_dir: Option<PathBuf>,

    /// Raw test set (one folder per case).
    #[arg(long)]
    test_dir: Option<PathBuf>,

    /// Output dataset folder. Defaults to $BRATS_RAW_DIR.
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CacheArgs {
    /// Raw training set containing HGG/ and LGG/. Defaults to $BRATS_TRAIN_DIR.
    #[arg(long)]
    train_dir: Option<PathBuf>,

    /// Output npz folder.
    #[arg(long)]
    out_dir: PathBuf,
}

fn report_failures(report: &ConversionReport) {
    for (name, e) in &report.failed {
        warn!("{name}: {e}");
    }
}

fn run_convert(args: ConvertArgs) -> anyhow::Result<()> {
    let (Some(exp_name), Some(train_test), Some(fold)) = (args.exp_name, args.train_test, args.fold)
    else {
        bail!("--exp-name, --train_test and --fold are required");
    };
    let root = args
        .root_dir
        .unwrap_or_else(loader::results_dir_from_env_or_home);
    let fold_dir = root.join(&exp_name).join(format!("fold_{fold}"));
    let input = fold_dir.join(&train_test);
    let output = fold_dir.join(format!("{train_test}_brats_format"));
    utils::sep();
    info!("{train_test}");

    info!("Converting...");
    let report = convert_folder_to_raw(&input, &output, args.workers)
        .with_context(|| format!("cannot convert {}", input.display()))?;
    report_failures(&report);
    zip_folder(&output, fold_dir.join(format!("{train_test}_results")))?;

    let mut post_output: Option<PathBuf> = None;
    let mut failed = report.failed.len();
    if args.post {
        info!("Post processing...");
        let post = fold_dir.join(format!("{train_test}_post_brats_format"));
        let report = post_process_folder(&output, &post, args.min_enhancing, args.workers)
            .with_context(|| format!("cannot post-process {}", output.display()))?;
        report_failures(&report);
        failed += report.failed.len();
        zip_folder(&post, fold_dir.join(format!("{train_test}_results_post")))?;
        post_output = Some(post);
    }

    info!("Completed converting labels back to BraTS2018 convention");
    info!("Input folder: {}", input.display());
    info!("Output folder: {}", output.display());
    if let Some(p) = post_output {
        info!("Post output folder: {}", p.display());
    }
    if failed > 0 {
        bail!("{failed} file(s) failed, see the log above");
    }
    Ok(())
}

fn run_import(args: ImportArgs) -> anyhow::Result<()> {
    let train_dir = args
        .train_dir
        .unwrap_or_else(loader::train_dir_from_env_or_home);
    let out_dir = args.out_dir.unwrap_or_else(loader::raw_dir_from_env_or_home);
    let json = import_raw_dataset(&train_dir, args.test_dir.as_deref(), &out_dir)
        .with_context(|| format!("cannot import {}", train_dir.display()))?;
    info!(
        "imported {} training case(s) into {}",
        json.num_training,
        out_dir.display()
    );
    Ok(())
}

fn run_cache(args: CacheArgs) -> anyhow::Result<()> {
    let train_dir = args
        .train_dir
        .unwrap_or_else(loader::train_dir_from_env_or_home);
    let source = BratsFolder::scan(&train_dir)
        .with_context(|| format!("cannot scan {}", train_dir.display()))?;
    let mut cache = NpzCaseFolder::create(&args.out_dir)?;
    let total = source.len();
    for (i, key) in source.keys().iter().enumerate() {
        let case = source.load_case(key).with_context(|| format!("case {key}"))?;
        cache.write_case(&case)?;
        info!("[{}/{total}] cached {key}", i + 1);
    }
    info!("{total} case(s) cached in {}", cache.path().display());
    Ok(())
}

fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    if !p.is_dir() {
        bail!("{} is not a directory", p.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::init_logger(cli.verbose);

    match cli.command {
        Some(Command::Import(args)) => {
            if let Some(d) = &args.train_dir {
                ensure_dir(d)?;
            }
            run_import(args)
        }
        Some(Command::Cache(args)) => {
            if let Some(d) = &args.train_dir {
                ensure_dir(d)?;
            }
            run_cache(args)
        }
        None => run_convert(cli.convert),
    }
}
