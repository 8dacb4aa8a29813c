use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use keymint_core::{Artifact, Bundle, Dispatcher, Facts, KeygenCommand};

fn main() -> Result<()> {
    // Reset SIGPIPE to default so piping output to `head` etc. exits cleanly
    // instead of panicking with "broken pipe".
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    // Artifacts go to stdout; diagnostics stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str).unwrap_or("help");

    let request = match cmd {
        "public" | "private" => cmd,
        "known_hosts" | "known-hosts" => "known_hosts",
        "authorized_keys" | "authorized-keys" => "authorized_keys",
        "help" | "--help" | "-h" => {
            print_help();
            return Ok(());
        }
        other => {
            eprintln!("unknown request: {other}");
            print_help();
            std::process::exit(1);
        }
    };

    let invocation = parse_args(request, &args[1..])?;
    run(invocation)
}

/// Everything parsed off the command line.
struct Invocation {
    bundle: Bundle,
    hostname: Option<String>,
    fqdn: Option<String>,
    ipaddress: Option<String>,
    keygen: Option<PathBuf>,
}

fn parse_args(request: &str, args: &[String]) -> Result<Invocation> {
    let mut invocation = Invocation {
        bundle: Bundle {
            request: Some(request.to_string()),
            ..Bundle::default()
        },
        hostname: None,
        fqdn: None,
        ipaddress: None,
        keygen: None,
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--hostname" => invocation.hostname = Some(flag_value(&mut iter, "--hostname")?),
            "--fqdn" => invocation.fqdn = Some(flag_value(&mut iter, "--fqdn")?),
            "--ipaddress" => invocation.ipaddress = Some(flag_value(&mut iter, "--ipaddress")?),
            "--keygen" => invocation.keygen = Some(flag_value(&mut iter, "--keygen")?.into()),
            other => {
                let (key, value) = other
                    .split_once('=')
                    .with_context(|| format!("expected option=value, got '{other}'"))?;
                set_option(&mut invocation.bundle, key, value)?;
            }
        }
    }
    Ok(invocation)
}

fn flag_value(iter: &mut std::slice::Iter<'_, String>, flag: &str) -> Result<String> {
    match iter.next() {
        Some(v) => Ok(v.clone()),
        None => bail!("{flag} requires a value"),
    }
}

fn set_option(bundle: &mut Bundle, key: &str, value: &str) -> Result<()> {
    match key {
        "name" => bundle.name = Some(value.to_string()),
        "type" => bundle.key_type = value.to_string(),
        "basedir" => bundle.basedir = PathBuf::from(value),
        "dir" => bundle.dir = value.to_string(),
        "comment" => bundle.comment = Some(value.to_string()),
        "hostkey" => bundle.hostkey = parse_bool(key, value)?,
        "authkey" => bundle.authkey = parse_bool(key, value)?,
        "as_hash" => bundle.as_hash = parse_bool(key, value)?,
        "hostaliases" => {
            bundle.hostaliases = Some(value.split(',').map(str::to_string).collect());
        }
        other => bail!("unknown option '{other}'"),
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("option '{key}' expects true or false, got '{other}'"),
    }
}

fn run(invocation: Invocation) -> Result<()> {
    let hostname = match invocation.hostname {
        Some(h) => h,
        None => system_hostname().context(
            "unable to determine the system hostname; pass --hostname explicitly",
        )?,
    };
    let facts = Facts {
        hostname,
        fqdn: invocation.fqdn,
        ipaddress: invocation.ipaddress,
    };

    let dispatcher = match invocation.keygen {
        Some(program) => Dispatcher::with_keygen(KeygenCommand::with_program(program)),
        None => Dispatcher::new(),
    };

    match dispatcher.dispatch(&invocation.bundle, &facts)? {
        Artifact::Text(text) => {
            print!("{text}");
            if !text.is_empty() && !text.ends_with('\n') {
                println!();
            }
        }
        Artifact::Map(map) => {
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    let mut buf = [0u8; 256];
    let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if ret != 0 {
        return None;
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).ok()
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

fn print_help() {
    println!(
        "\
keymint - SSH keypair and trust registry management for convergence runs

USAGE:
    keymint <request> [option=value ...] [flags]

REQUESTS:
    public                              Ensure the named keypair exists, print the public key
    private                             Ensure the named keypair exists, print the private key
    known_hosts                         Print the known_hosts registry (alias: known-hosts)
    authorized_keys                     Print the authorized_keys registry (alias: authorized-keys)
    help                                Show this help

OPTIONS (key=value):
    name=<name>                         Logical key name (required for public/private)
    type=<algorithm>                    Key algorithm, passed to the generator  [default: rsa]
    basedir=<path>                      Root of the key directories             [default: /etc/keymint]
    dir=<subdir>                        Subdirectory holding keys + registries  [default: ssh]
    hostkey=<true|false>                Register the key in known_hosts         [default: false]
    hostaliases=<a,b,c>                 Extra host identifiers for known_hosts
    authkey=<true|false>                Append the key to authorized_keys       [default: false]
    comment=<text>                      Key comment; defaults to the hostname for host keys
                                        and root@<hostname> for authorized keys
    as_hash=<true|false>                Print authorized_keys as JSON keyed by comment

FLAGS:
    --hostname <name>                   Hostname fact      [default: the system hostname]
    --fqdn <name>                       FQDN fact (required with hostkey=true)
    --ipaddress <addr>                  IP address fact
    --keygen <path>                     Key generator executable [default: ssh-keygen from PATH]

EXAMPLES:
    keymint public name=web1 type=ed25519
    keymint private name=web1
    keymint public name=host hostkey=true --fqdn node1.example.net --ipaddress 192.0.2.10
    keymint public name=deploy authkey=true comment=deploy@node1
    keymint known_hosts
    keymint authorized_keys as_hash=true"
    );
}
