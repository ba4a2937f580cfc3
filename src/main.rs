//! Demo binary: runs one Wasm contract through the dispatcher against an
//! in-memory [`MockHostContext`] and prints the resulting status, gas left,
//! and return value as hex. Not part of the host ABI, a development
//! convenience, the Rust-side analogue of a VM's standalone CLI driver.

use std::fs;
use std::process::ExitCode;

use ewasm_engine::{
    dispatch, Address, CallKind, CallMessage, DispatcherConfig, MessageFlags, MockHostContext,
    Revision, StatusCode, WasmerEngine,
};

fn usage() -> ! {
    eprintln!("usage: ewasm-run <contract.wasm> [--config <ewasm.toml>]");
    std::process::exit(2);
}

fn main() -> ExitCode {
    ewasm_engine::init_logging();

    let mut args = std::env::args().skip(1);
    let code_path = match args.next() {
        Some(p) => p,
        None => usage(),
    };

    let mut config = DispatcherConfig::default();
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--config" => {
                let path = args.next().unwrap_or_else(|| usage());
                let text = match fs::read_to_string(&path) {
                    Ok(t) => t,
                    Err(e) => {
                        eprintln!("ewasm-run: reading {path}: {e}");
                        return ExitCode::FAILURE;
                    }
                };
                config = match DispatcherConfig::from_toml_str(&text) {
                    Ok(c) => c,
                    Err(e) => {
                        eprintln!("ewasm-run: parsing {path}: {e}");
                        return ExitCode::FAILURE;
                    }
                };
            }
            other => {
                eprintln!("ewasm-run: unrecognized argument {other}");
                usage();
            }
        }
    }

    let code = match fs::read(&code_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ewasm-run: reading {code_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let engine = WasmerEngine::new(cfg!(feature = "debug-imports"), 50_000_000);
    let host = Box::new(MockHostContext::new());
    let message = CallMessage {
        sender: Address::ZERO,
        destination: Address::ZERO,
        value: ewasm_engine::U256Be::ZERO,
        input: Vec::new(),
        gas: 10_000_000,
        kind: CallKind::Call,
        flags: MessageFlags::NONE,
        depth: 0,
        revision: Revision::Byzantium,
    };

    let (status, result) = dispatch(&engine, &config, message, &code, host);

    println!("status: {status:?}");
    println!("gas_left: {}", result.gas_left);
    println!("return_value: 0x{}", hex::encode(&result.return_value));

    if status == StatusCode::Success || status == StatusCode::Revert {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
