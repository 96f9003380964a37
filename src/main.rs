use std::process::exit;
use clap::App;
use srxd::config::Config;
use srxd::error::ExitError;
use srxd::operation::Operation;

// Since `main` with a result insists on printing a message, but in our
// case all diagnostics have been logged by the time we get an error, we
// make our own, more quiet version.
fn _main() -> Result<(), ExitError> {
    let matches = Operation::config_args(Config::config_args(
        App::new("srxd")
            .version(clap::crate_version!())
            .author(clap::crate_authors!())
            .about("validates the security of BGP path announcements")
    )).get_matches();
    let config = Config::from_arg_matches(&matches)?;
    let operation = Operation::from_arg_matches(&matches)?;
    operation.run(config)
}

fn main() {
    match _main() {
        Ok(_) => exit(0),
        Err(err) => exit(err.exit_code()),
    }
}
