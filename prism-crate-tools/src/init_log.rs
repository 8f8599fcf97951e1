use std::io::Write;

/// 使用默认等级 (Info) 初始化日志
///
/// `RUST_LOG` 环境变量会覆盖默认等级，例如 `RUST_LOG=prism_render_graph=trace`
/// 可以看到每一个 barrier 的生成过程。
pub fn init_log() {
    init_log_with_level(log::LevelFilter::Info);
}

/// 指定默认等级初始化日志
///
/// 重复初始化不会 panic，只会输出一条警告（多个 offline job 共享进程时会发生）。
pub fn init_log_with_level(level: log::LevelFilter) {
    let result = env_logger::Builder::new()
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));
            let trace_style = buf
                .default_level_style(log::Level::Trace)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Magenta)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                log::Level::Trace => trace_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%H:%M:%S%.3f");
            let level = record.level();
            let target = record.target().split("::").next().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {level:<5}{level_style:#} {grey_style}[{target}|{file}:{line}]{grey_style:#} {}",
                record.args()
            )
        })
        .filter(None, level)
        .parse_default_env()
        .try_init();

    if let Err(e) = result {
        log::warn!("logger already initialized: {}", e);
    }
}
