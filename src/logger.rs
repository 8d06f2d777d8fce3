/// Stdout carries the reply stream, so all logging goes to stderr.
pub fn init() -> anyhow::Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Warn)
        .level_for("libraryd", log::LevelFilter::Debug)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}
