//! 命令行工具依赖的通用组件.

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 安装全局日志. `verbose` 为真时输出 `debug` 级别, 否则为 `info`.
pub fn init_logger(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // 重复安装 (例如测试中) 时忽略错误.
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();
}

/// 设置全局 `rayon` 线程池大小. `threads` 为 `None` 时使用全部核心.
///
/// 只能在第一次使用 `rayon` 之前调用, 否则返回错误.
pub fn init_threads(threads: Option<usize>) -> Result<usize, rayon::ThreadPoolBuildError> {
    let n = threads.unwrap_or_else(cpus).max(1);
    rayon::ThreadPoolBuilder::new().num_threads(n).build_global()?;
    Ok(n)
}
