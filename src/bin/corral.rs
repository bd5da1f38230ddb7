// Copyright 2026 the corral developers
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::time::Duration;

use clap::{value_parser, Arg, Command};
use tokio::runtime;
use tracing::error;
use tracing_subscriber::EnvFilter;

use corral::placement::LaunchParameters;
use corral::supervise::{SuperviseConfig, Supervisor};

fn cli() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("workers")
                .short('n')
                .long("workers")
                .value_name("COUNT")
                .value_parser(value_parser!(usize))
                .default_value("4")
                .help("number of workers to supervise, one per CPU core"),
        )
        .arg(
            Arg::new("start-port")
                .long("start-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .default_value("6380")
                .help("first TCP port; worker i is assigned start-port + i"),
        )
        .arg(
            Arg::new("socket-dir")
                .long("socket-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("directory for unix sockets; when set, workers disable their TCP listeners"),
        )
        .arg(
            Arg::new("output-dir")
                .long("output-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .required(true)
                .help("directory receiving one append-only log file per worker"),
        )
        .arg(
            Arg::new("worker-binary")
                .long("worker-binary")
                .value_name("BIN")
                .default_value("redis-server")
                .help("worker executable to launch"),
        )
        .arg(
            Arg::new("max-memory")
                .long("max-memory")
                .value_name("SIZE")
                .default_value("4gb")
                .help("memory ceiling handed to each worker"),
        )
        .arg(
            Arg::new("poll-interval")
                .long("poll-interval")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("5")
                .help("seconds between liveness polling rounds"),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .value_name("COUNT")
                .value_parser(value_parser!(u64))
                .help("stop after this many polling rounds instead of running until signalled"),
        )
        .arg(
            Arg::new("probe-timeout")
                .long("probe-timeout")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("2")
                .help("seconds to wait for a single liveness reply"),
        )
        .arg(
            Arg::new("grace")
                .long("grace")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .default_value("5")
                .help("seconds a worker gets to exit after SIGTERM before it is killed"),
        )
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = cli().get_matches();

    let params = LaunchParameters {
        workers: *args.get_one::<usize>("workers").expect("defaulted"),
        start_port: *args.get_one::<u16>("start-port").expect("defaulted"),
        socket_dir: args.get_one::<PathBuf>("socket-dir").cloned(),
        output_dir: args.get_one::<PathBuf>("output-dir").cloned().expect("required"),
        worker_binary: args
            .get_one::<String>("worker-binary")
            .cloned()
            .expect("defaulted"),
        max_memory: args.get_one::<String>("max-memory").cloned().expect("defaulted"),
    };

    let defaults = SuperviseConfig::default();
    let config = SuperviseConfig {
        poll_interval: Duration::from_secs(*args.get_one::<u64>("poll-interval").expect("defaulted")),
        rounds: args.get_one::<u64>("rounds").copied(),
        probe_timeout: Duration::from_secs(*args.get_one::<u64>("probe-timeout").expect("defaulted")),
        grace: Duration::from_secs(*args.get_one::<u64>("grace").expect("defaulted")),
        ..defaults
    };

    let mut supervisor = match Supervisor::new(params, config) {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    // The supervisor is a single cooperative control loop; worker parallelism
    // comes from the spawned processes, not from this runtime.
    let runtime = runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .expect("failed to initialize tokio runtime");

    if let Err(err) = runtime.block_on(supervisor.run()) {
        error!(error = %err, "supervision ended with error");
        std::process::exit(1);
    }
}
