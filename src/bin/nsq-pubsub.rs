//! nsq-pubsub – publish stdin lines to NSQ, or print what arrives.
//
//  $ nsq-pubsub publish --topic chat
//  message: hello
//  $ nsq-pubsub subscribe --topic chat --channel tail
use std::process;

use clap::Parser;
use nsq_pubsub::cli::Cli;
use nsq_pubsub::logging::init_logging;
use tokio::runtime::Builder;

fn main() {
    init_logging();

    // usage errors print and exit with status 2 before anything connects
    let cli = Cli::parse();

    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("[FATAL] failed to start the async runtime: {e}");
            process::exit(1);
        }
    };

    let result = runtime.block_on(cli.run());

    // a stdin read parked on a blocking thread can't be cancelled; don't wait for it
    runtime.shutdown_background();

    if let Err(e) = result {
        eprintln!("[FATAL] {e:#}");
        process::exit(1);
    }
}
