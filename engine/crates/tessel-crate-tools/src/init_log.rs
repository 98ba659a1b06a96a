use std::io::Write;

/// 默认日志格式：带颜色的等级 + 时间 + 来源位置
fn format_record(buf: &mut env_logger::fmt::Formatter, record: &log::Record) -> std::io::Result<()> {
    let level = record.level();
    let color = match level {
        log::Level::Info => Some(anstyle::AnsiColor::Green),
        log::Level::Warn => Some(anstyle::AnsiColor::Yellow),
        log::Level::Error => Some(anstyle::AnsiColor::Red),
        _ => None,
    };
    let level_style = match color {
        Some(color) => buf.default_level_style(level).fg_color(Some(color.into())),
        None => buf.default_level_style(level),
    };
    let location_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

    let line = record.line().unwrap_or(!0);
    let file = record.file().unwrap_or("").rsplit(|c: char| c == '\\' || c == '/').next().unwrap_or("");
    let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
    let module = record.module_path().unwrap_or("");

    writeln!(
        buf,
        "{level_style}[{time}] {level}: {}{level_style:#}\n\t {location_style}In {module} At {file}:{line}{location_style:#}",
        record.args()
    )
}

/// 初始化全局 logger，默认等级为 Info，`RUST_LOG` 可以覆盖
pub fn init_log() {
    env_logger::Builder::new()
        .format(format_record)
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();
}

/// 测试中使用：可以重复调用，输出交给测试框架捕获
pub fn init_test_log() {
    let _ = env_logger::Builder::new()
        .format(format_record)
        .filter(None, log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
