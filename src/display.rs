//! Terminal output for the forwarding summary

use crate::mapping::Mapping;
use crossterm::style::{Color, Stylize};
use std::net::IpAddr;

const GREEN: Color = Color::AnsiValue(46);
const CYAN: Color = Color::AnsiValue(86);
const PURPLE: Color = Color::AnsiValue(134);

const LOGO: &str = r#"
 ____    ___   ____   ______  __ __  ____
|    \  /   \ |    \ |      T|  T  T|    \
|  o  )Y     Y|  D  )|      ||  |  ||  o  )
|   _/ |  O  ||    / l_j  l_j|  |  ||   _/
|  |   |     ||    \   |  |  |  :  ||  |
|  |   l     !|  .  Y  |  |  l     ||  |
l__j    \___/ l__j\_j  l__j   \__,_jl__j
"#;

/// Mapping token formats, shown alongside parse errors
pub const MAPPING_FORMATS: &str = "\
Port Mapping Formats:
  <port>                     Forward local port to the same remote port
  <local>~<remote>           Forward local port to a different remote port
  <ip:port>                  Forward from a specific local IP and port to same remote port
  <ip:port>~<remote>         Forward from specific local IP and port to remote port

Examples:
  portup tcp 8080~12345
  portup udp 192.168.1.101:5000
  portup tcp 192.168.1.101:8080~80
  portup udp 8080 192.168.1.50:1234~5678
  portup cleanup";

/// Print the logo banner
pub fn print_banner() {
    println!("{}", LOGO.with(CYAN));
}

/// Print the banner and one line per live mapping
pub fn print_forwarding(mappings: &[Mapping], external_ip: Option<IpAddr>) {
    print_banner();
    println!("Currently Forwarding Ports:");

    let external = external_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "?".to_string());

    for mapping in mappings {
        println!(
            " {}:{} {} {}:{}",
            external.as_str().with(PURPLE),
            mapping.remote_port.to_string().with(CYAN),
            "->".with(GREEN),
            mapping.local_address.to_string().with(PURPLE),
            mapping.local_port.to_string().with(CYAN),
        );
    }

    if mappings.is_empty() {
        println!(" (none)");
    }
}
