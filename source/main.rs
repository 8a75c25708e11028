use clap::Parser as _;
use std::path;

#[derive(clap::Parser)]
struct Arguments {
  #[clap(flatten)]
  arguments: imap_proxy::Arguments,
  #[arg(
    long = "log-directory",
    help = "Log directory",
    default_value_t = String::from("/var/log/imap-proxy")
  )]
  pub log_directory: String,

  #[arg(
    long = "allow-placeholder-groomer",
    help = "Run with the built-in no-op groomer (tags messages but never defangs attachments) \
            instead of refusing to start; for demos and integration testing only",
    default_value_t = false
  )]
  pub allow_placeholder_groomer: bool,
}

fn main() -> anyhow::Result<()> {
  let arguments = Arguments::parse();

  let encoder = Box::new(log4rs::encode::pattern::PatternEncoder::new(
    "{d(%F %T)} {l} {t} - {m}{n}",
  ));
  log4rs::init_config(
    log4rs::config::Config::builder()
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            log::LevelFilter::Trace,
          )))
          .build(
            "file",
            Box::new(
              log4rs::append::file::FileAppender::builder()
                .encoder(encoder.clone())
                .build(path::Path::new(&arguments.log_directory).join("imap-proxy.log"))?,
            ),
          ),
      )
      .appender(
        log4rs::config::Appender::builder()
          .filter(Box::new(log4rs::filter::threshold::ThresholdFilter::new(
            arguments.arguments.verbose.log_level_filter(),
          )))
          .build(
            "console",
            Box::new(
              log4rs::append::console::ConsoleAppender::builder()
                .encoder(encoder)
                .build(),
            ),
          ),
      )
      .build(
        log4rs::config::Root::builder()
          .appenders(["console", "file"])
          .build(log::LevelFilter::Trace),
      )?,
  )?;

  if !arguments.allow_placeholder_groomer {
    anyhow::bail!(
      "no groomer is wired in: this build only ships imap_proxy::EchoGroomer, a test double that \
       tags messages without defanging attachments. Pass --allow-placeholder-groomer to run with \
       the no-op double anyway, or link in a real Groom implementation and rebuild."
    );
  }
  log::warn!("running with the placeholder EchoGroomer: messages will be tagged but not sanitized");

  let config = arguments.arguments.into_config();
  imap_proxy::run(config, || Box::new(imap_proxy::EchoGroomer))
}
