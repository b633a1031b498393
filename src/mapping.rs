//! Mapping specifications and the token parser
//!
//! A mapping token names the local side and optionally a different remote
//! port. `~` separates local from remote, `:` separates an explicit local IP
//! from the local port:
//!
//! | Token              | Meaning                                         |
//! |--------------------|-------------------------------------------------|
//! | `PORT`             | local = remote = PORT, auto-detected address    |
//! | `LOCAL~REMOTE`     | auto-detected address                           |
//! | `IP:PORT`          | local = remote = PORT on IP                     |
//! | `IP:LOCAL~REMOTE`  | LOCAL on IP, exposed as REMOTE                  |

use crate::network::{is_private_address, same_range};
use crate::TOOL_TAG;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Transport protocol of a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP protocol
    TCP,
    /// UDP protocol
    UDP,
}

impl Protocol {
    /// Uppercase canonical name as used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::TCP => "TCP",
            Protocol::UDP => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::TCP),
            "UDP" => Ok(Protocol::UDP),
            _ => Err(ParseError::InvalidProtocol(s.to_string())),
        }
    }
}

/// A validated forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Internal host the gateway forwards to
    pub local_address: IpAddr,
    /// Internal service port
    pub local_port: u16,
    /// External port exposed by the gateway
    pub remote_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

impl Mapping {
    /// Description stored on the gateway; carries the tool tag
    pub fn description(&self) -> String {
        format!("{} {} {}", TOOL_TAG, self.protocol, self.local_port)
    }

    /// The fields needed to remove this mapping again
    pub fn applied(&self) -> AppliedMapping {
        AppliedMapping {
            remote_port: self.remote_port,
            protocol: self.protocol,
        }
    }
}

/// What is kept of a mapping once the gateway accepted it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppliedMapping {
    /// External port on the gateway
    pub remote_port: u16,
    /// Transport protocol
    pub protocol: Protocol,
}

/// Errors produced while parsing mapping tokens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Token has more than one `~`
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Port is non-numeric or outside 1-65535
    #[error("invalid port '{value}' in mapping: {token}")]
    InvalidPort {
        /// The offending token
        token: String,
        /// The port text that failed
        value: String,
    },

    /// Local address is not a private address
    #[error("invalid local IP '{address}' in mapping: {token}")]
    InvalidLocalAddress {
        /// The offending token
        token: String,
        /// The resolved address text, empty when detection failed
        address: String,
    },

    /// Protocol other than tcp/udp
    #[error("invalid protocol: {0}. Must be tcp or udp")]
    InvalidProtocol(String),
}

/// Non-fatal findings about an explicitly supplied local address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressWarning {
    /// Address is private but in a different range than this machine
    DifferentRange {
        /// Address from the token
        address: IpAddr,
        /// This machine's detected address, if any
        local: Option<IpAddr>,
    },
    /// Address is in this machine's range but is another host
    OtherHost {
        /// Address from the token
        address: IpAddr,
        /// This machine's detected address
        local: IpAddr,
    },
}

impl fmt::Display for AddressWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressWarning::DifferentRange { address, local } => {
                let local = local.map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".into());
                write!(
                    f,
                    "Local IP {} is not in the same network range as the local IP of current machine {}, UPnP may fail. \
                     Are you sure you entered the correct IP address?",
                    address, local
                )
            }
            AddressWarning::OtherHost { address, local } => write!(
                f,
                "Local IP {} is a different host than the current machine {}, the gateway may refuse to forward to it.",
                address, local
            ),
        }
    }
}

/// Result of parsing a batch of tokens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    /// Mappings in input order
    pub mappings: Vec<Mapping>,
    /// Warnings raised along the way, already logged
    pub warnings: Vec<AddressWarning>,
}

/// Turns raw tokens into validated mappings
#[derive(Debug, Clone, Copy)]
pub struct MappingParser {
    detected_local: Option<IpAddr>,
}

impl MappingParser {
    /// Parser using this machine's detected outbound address
    pub fn new() -> Self {
        Self::with_local_address(crate::network::detect_local_address())
    }

    /// Parser with a fixed notion of "this machine"
    pub fn with_local_address(detected_local: Option<IpAddr>) -> Self {
        Self { detected_local }
    }

    /// The address used for tokens without an explicit IP
    pub fn detected_local(&self) -> Option<IpAddr> {
        self.detected_local
    }

    /// Parse all tokens, failing on the first invalid one
    ///
    /// Address warnings are logged as they are found and also returned.
    ///
    /// # Arguments
    /// * `tokens` - Mapping tokens in any of the forms listed in the module docs
    /// * `protocol` - Protocol applied to every resulting mapping
    ///
    /// # Returns
    /// The mappings in input order plus any warnings, or the error for the
    /// first token that does not parse
    ///
    /// # Example
    /// ```rust
    /// use portup::mapping::{MappingParser, Protocol};
    ///
    /// let parser = MappingParser::with_local_address(Some("192.168.1.20".parse().unwrap()));
    /// let outcome = parser.parse(&["8080", "1234~5678"], Protocol::UDP).unwrap();
    ///
    /// assert_eq!(outcome.mappings[1].local_port, 1234);
    /// assert_eq!(outcome.mappings[1].remote_port, 5678);
    /// assert!(outcome.warnings.is_empty());
    /// ```
    pub fn parse<S: AsRef<str>>(
        &self,
        tokens: &[S],
        protocol: Protocol,
    ) -> Result<ParseOutcome, ParseError> {
        let mut outcome = ParseOutcome::default();

        for token in tokens {
            let (mapping, warning) = self.parse_token(token.as_ref(), protocol)?;
            if let Some(warning) = warning {
                warn!("{}", warning);
                outcome.warnings.push(warning);
            }
            outcome.mappings.push(mapping);
        }

        Ok(outcome)
    }

    /// Parse one token; the warning is returned, not logged
    pub fn parse_token(
        &self,
        token: &str,
        protocol: Protocol,
    ) -> Result<(Mapping, Option<AddressWarning>), ParseError> {
        let parts: Vec<&str> = token.split('~').collect();
        let (local_side, remote_side) = match parts.as_slice() {
            [local] => (*local, None),
            [local, remote] => (*local, Some(*remote)),
            _ => return Err(ParseError::InvalidFormat(token.to_string())),
        };

        let (explicit_ip, local_port_text) = match local_side.split_once(':') {
            Some((ip, port)) => (Some(ip), port),
            None => (None, local_side),
        };

        let local_port = parse_port(token, local_port_text)?;
        let remote_port = match remote_side {
            Some(remote) => parse_port(token, remote)?,
            None => local_port,
        };

        let local_address = match explicit_ip {
            Some(text) => text.parse::<IpAddr>().map_err(|_| ParseError::InvalidLocalAddress {
                token: token.to_string(),
                address: text.to_string(),
            })?,
            None => self.detected_local.ok_or_else(|| ParseError::InvalidLocalAddress {
                token: token.to_string(),
                address: String::new(),
            })?,
        };

        if !is_private_address(local_address) {
            return Err(ParseError::InvalidLocalAddress {
                token: token.to_string(),
                address: local_address.to_string(),
            });
        }

        let warning = explicit_ip.and_then(|_| self.check_target(local_address));

        Ok((
            Mapping {
                local_address,
                local_port,
                remote_port,
                protocol,
            },
            warning,
        ))
    }

    fn check_target(&self, address: IpAddr) -> Option<AddressWarning> {
        match self.detected_local {
            Some(local) if same_range(address, local) => (address != local)
                .then_some(AddressWarning::OtherHost { address, local }),
            local => Some(AddressWarning::DifferentRange { address, local }),
        }
    }
}

impl Default for MappingParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_port(token: &str, text: &str) -> Result<u16, ParseError> {
    let invalid = || ParseError::InvalidPort {
        token: token.to_string(),
        value: text.to_string(),
    };

    let value: i64 = text.trim().parse().map_err(|_| invalid())?;
    if !(1..=65535).contains(&value) {
        return Err(invalid());
    }
    u16::try_from(value).map_err(|_| invalid())
}
