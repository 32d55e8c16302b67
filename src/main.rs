mod launch;

use std::process::exit;

use crate::launch::RootCommand;

fn main() {
    let opts: RootCommand = argh::from_env();

    if let Err(code) = opts.run() {
        exit(code)
    }
}
