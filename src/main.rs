use std::{collections::HashMap, env, process::ExitCode};

use anyhow::{Context, Result, anyhow, bail};
use utxo_chain::{
    config::NodeConfig,
    core::{blockchain::Blockchain, pow::ProofOfWork},
    crypto::{address, keys::Private},
    node::{
        network::Offline,
        node::{Node, init_logger},
    },
};

const USAGE: &str = "Usage:
  createblockchain -address ADDRESS   Create a ledger and pay the genesis reward to ADDRESS
  getbalance -address ADDRESS         Get the balance of ADDRESS
  printchain                          Print every block from head to genesis
  reindexutxo                         Rebuild the UTXO index
  newkey                              Generate a private key and print it with its address
  send -key HEX -to ADDRESS -amount N [-mine]
                                      Send N coins; -mine mines the block here and pays the reward to the sender

Environment: NODE_ID (required), DATA_DIR, LOG_LEVEL, MINING_THREADS";

#[derive(Debug, PartialEq)]
enum Command {
    CreateBlockchain { address: String },
    GetBalance { address: String },
    PrintChain,
    ReindexUtxo,
    NewKey,
    Send {
        key: String,
        to: String,
        amount: u64,
        mine: bool,
    },
}

const BOOL_FLAGS: &[&str] = &["mine"];

/// Parse `-name value`, `-name=value` and bare boolean flags
fn parse_flags(args: &[String]) -> Result<HashMap<String, String>> {
    let mut flags = HashMap::new();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        let Some(flag) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            bail!("unexpected argument {arg}");
        };
        let (name, value) = match flag.split_once('=') {
            Some((name, value)) => (name.to_string(), value.to_string()),
            None if BOOL_FLAGS.contains(&flag) => (flag.to_string(), "true".to_string()),
            None => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("flag -{flag} needs a value"))?;
                (flag.to_string(), value.clone())
            }
        };
        flags.insert(name, value);
    }
    Ok(flags)
}

fn required(flags: &HashMap<String, String>, name: &str) -> Result<String> {
    flags
        .get(name)
        .filter(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| anyhow!("missing -{name}"))
}

fn parse_command(args: &[String]) -> Result<Command> {
    let Some((name, rest)) = args.split_first() else {
        bail!("no command given");
    };
    let flags = parse_flags(rest)?;

    let command = match name.as_str() {
        "createblockchain" => Command::CreateBlockchain {
            address: required(&flags, "address")?,
        },
        "getbalance" => Command::GetBalance {
            address: required(&flags, "address")?,
        },
        "printchain" => Command::PrintChain,
        "reindexutxo" => Command::ReindexUtxo,
        "newkey" => Command::NewKey,
        "send" => {
            let amount = required(&flags, "amount")?;
            Command::Send {
                key: required(&flags, "key")?,
                to: required(&flags, "to")?,
                amount: amount
                    .parse()
                    .map_err(|_| anyhow!("invalid amount {amount}"))?,
                mine: flags
                    .get("mine")
                    .is_some_and(|value| value == "true" || value == "1"),
            }
        }
        other => bail!("unknown command {other}"),
    };
    Ok(command)
}

fn load_config() -> Result<NodeConfig> {
    let config = NodeConfig::from_env().context("NODE_ID env is not set or invalid")?;
    init_logger(&config);
    Ok(config)
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::NewKey => {
            let private = Private::new_random()?;
            println!("Private key: {}", hex::encode(private.dump_pkcs8()));
            println!("Address: {}", private.to_public().to_address());
        }
        Command::CreateBlockchain { address } => {
            let chain = Blockchain::init(&load_config()?.ledger_path(), &address)?;
            println!(
                "Finished! {} transactions in the UTXO set",
                chain.get_utxos().count_transactions()
            );
            chain.close()?;
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address::decode(&address)?;
            let chain = Blockchain::open(&load_config()?.ledger_path())?;
            let balance = chain.get_utxos().balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
            chain.close()?;
        }
        Command::PrintChain => {
            let chain = Blockchain::open(&load_config()?.ledger_path())?;
            for block in chain.iter()? {
                let block = block?;
                println!(
                    "Prev. hash: {}",
                    block.prev_hash.map(|h| h.dump_hex()).unwrap_or_default()
                );
                println!("Hash: {}", block.hash);
                println!("Height: {}", block.height);
                println!("PoW: {}", ProofOfWork::validate(&block));
                for tx in &block.transactions {
                    println!("{tx}");
                }
                println!();
            }
            chain.close()?;
        }
        Command::ReindexUtxo => {
            let chain = Blockchain::open(&load_config()?.ledger_path())?;
            let count = chain.reindex_utxos()?;
            println!("Done! There are {count} transactions in the UTXO set.");
            chain.close()?;
        }
        Command::Send {
            key,
            to,
            amount,
            mine,
        } => {
            let sender = Private::from_pkcs8(&hex::decode(key.trim()).context("key is not hex")?)?;
            let node = Node::new(load_config()?, Offline::shared())?;
            let tx = node.blockchain.new_transaction(&sender, &to, amount)?;
            if mine {
                let block = node.mine(vec![tx], &sender.to_public().to_address()).await?;
                println!("Mined block {} at height {}", block.hash, block.height);
            } else {
                let peer = node.submit_transaction(&tx).await?;
                println!("Sent TX to {peer}");
            }
            println!("Success!");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_command(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
