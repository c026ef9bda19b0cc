//! Loads the global → shared-network → subnet → pool → host configuration
//! tree from YAML into the `model.rs` types the rest of the engine
//! consumes. The configuration-file *parser* that would normally build
//! expression trees is out of scope; what lives here is the concrete tree
//! shape a deployed server actually reads off disk.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::model::{
    Class, ClassMatch, ClientId, Group, GroupSettings, HardwareAddr, HostDecl, OptionStatement,
    Pool, PoolAccess, Seconds, SharedNetwork, Subnet,
};
use crate::scope::{make_const_data, Expression};
use crate::store::{SetOp, Universe};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("option universe {0:?} is not a valid universe name")]
    UnknownUniverse(String),
    #[error("set-operation {0:?} is not one of default/supersede/append/prepend")]
    UnknownSetOp(String),
}

/// The fully loaded, queryable configuration.
pub struct Config {
    pub global: Group,
    pub shared_networks: Vec<SharedNetwork>,
    pub subnets: Vec<Subnet>,
    pub hosts: Vec<HostDecl>,
    pub classes: Vec<Class>,
}

impl Config {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        raw.into_config()
    }

    pub fn find_subnet_containing(&self, ip: Ipv4Addr) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.contains(ip))
    }

    pub fn find_shared_network(&self, name: &str) -> Option<&SharedNetwork> {
        self.shared_networks.iter().find(|s| s.name == name)
    }

    pub fn find_host_by_uid(&self, uid: &[u8]) -> Option<&HostDecl> {
        self.hosts
            .iter()
            .find(|h| h.client_id.as_deref() == Some(uid))
    }

    pub fn find_host_by_hw(&self, hw: &HardwareAddr) -> Option<&HostDecl> {
        self.hosts.iter().find(|h| h.hardware_addr == Some(*hw))
    }

    pub fn find_class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    global: RawGroup,
    #[serde(default)]
    shared_networks: Vec<RawSharedNetwork>,
    #[serde(default)]
    classes: Vec<RawClass>,
}

#[derive(Debug, Deserialize)]
struct RawClassMatch {
    universe: String,
    code: u8,
    equals: RawValue,
}

#[derive(Debug, Deserialize)]
struct RawClass {
    name: String,
    #[serde(rename = "match")]
    matches: RawClassMatch,
    lease_limit: Option<u32>,
    #[serde(default)]
    group: RawGroup,
}

impl RawClass {
    fn into_class(self) -> Result<Class, ConfigError> {
        let universe = parse_universe(&self.matches.universe)?;
        let equals = match self.matches.equals.into_expression() {
            Expression::Const(bytes) => bytes,
            _ => unreachable!("RawValue::into_expression always produces Const"),
        };

        Ok(Class {
            name: self.name,
            matches: ClassMatch {
                universe,
                code: self.matches.code,
                equals,
            },
            lease_limit: self.lease_limit,
            group: self.group.into_group()?,
        })
    }
}

fn parse_universe(name: &str) -> Result<Universe, ConfigError> {
    match name {
        "dhcp" => Ok(Universe::Dhcp),
        "server" => Ok(Universe::Server),
        "agent" => Ok(Universe::Agent),
        "vendor" => Ok(Universe::Vendor),
        "site" => Ok(Universe::Site),
        other => Err(ConfigError::UnknownUniverse(other.to_string())),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    authoritative: Option<bool>,
    allow_bootp: Option<bool>,
    allow_booting: Option<bool>,
    boot_unknown_clients: Option<bool>,
    deny_declines: Option<bool>,
    one_lease_per_client: Option<bool>,
    allow_duplicates: Option<bool>,
    min_secs: Option<u16>,
    default_lease_time: Option<Seconds>,
    min_lease_time: Option<Seconds>,
    max_lease_time: Option<Seconds>,
    bootp_lease_length: Option<Seconds>,
    bootp_lease_cutoff: Option<Seconds>,
    get_lease_hostnames: Option<bool>,
    use_host_decl_names: Option<bool>,
    always_broadcast: Option<bool>,
    filename: Option<String>,
    server_name: Option<String>,
    next_server: Option<Ipv4Addr>,
    server_identifier: Option<Ipv4Addr>,
}

impl From<RawSettings> for GroupSettings {
    fn from(r: RawSettings) -> Self {
        GroupSettings {
            authoritative: r.authoritative,
            allow_bootp: r.allow_bootp,
            allow_booting: r.allow_booting,
            boot_unknown_clients: r.boot_unknown_clients,
            deny_declines: r.deny_declines,
            one_lease_per_client: r.one_lease_per_client,
            allow_duplicates: r.allow_duplicates,
            min_secs: r.min_secs,
            default_lease_time: r.default_lease_time,
            min_lease_time: r.min_lease_time,
            max_lease_time: r.max_lease_time,
            bootp_lease_length: r.bootp_lease_length,
            bootp_lease_cutoff: r.bootp_lease_cutoff,
            get_lease_hostnames: r.get_lease_hostnames,
            use_host_decl_names: r.use_host_decl_names,
            always_broadcast: r.always_broadcast,
            filename: r.filename,
            server_name: r.server_name,
            next_server: r.next_server,
            server_identifier: r.server_identifier,
        }
    }
}

/// A value an option statement assigns. YAML can't spell an `Expression`
/// directly; this is the small closed set a configuration author can name,
/// each of which turns into a concrete `Expression` at load time.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Ipv4(Ipv4Addr),
    Ipv4List(Vec<Ipv4Addr>),
    U32(u32),
    Text(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    fn into_expression(self) -> Expression {
        match self {
            RawValue::Ipv4(ip) => make_const_data(ip.octets().to_vec()),
            RawValue::Ipv4List(ips) => {
                make_const_data(ips.into_iter().flat_map(|ip| ip.octets()).collect::<Vec<u8>>())
            }
            RawValue::U32(n) => make_const_data(n.to_be_bytes().to_vec()),
            RawValue::Text(s) => make_const_data(s.into_bytes()),
            RawValue::Bytes(b) => make_const_data(b),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStatement {
    universe: String,
    code: u8,
    op: String,
    value: RawValue,
}

impl RawStatement {
    fn into_statement(self) -> Result<OptionStatement, ConfigError> {
        let universe = parse_universe(&self.universe)?;

        let op = match self.op.as_str() {
            "default" => SetOp::Default,
            "supersede" => SetOp::Supersede,
            "append" => SetOp::Append,
            "prepend" => SetOp::Prepend,
            other => return Err(ConfigError::UnknownSetOp(other.to_string())),
        };

        Ok(OptionStatement {
            universe,
            code: self.code,
            op,
            expr: self.value.into_expression(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawGroup {
    #[serde(default)]
    name: String,
    #[serde(default)]
    settings: RawSettings,
    #[serde(default)]
    options: Vec<RawStatement>,
    #[serde(default)]
    on_commit: Vec<RawStatement>,
    #[serde(default)]
    on_expiry: Vec<RawStatement>,
    #[serde(default)]
    on_release: Vec<RawStatement>,
}

impl RawGroup {
    fn into_group(self) -> Result<Group, ConfigError> {
        let statements = self
            .options
            .into_iter()
            .map(RawStatement::into_statement)
            .collect::<Result<Vec<_>, _>>()?;
        let on_commit = self
            .on_commit
            .into_iter()
            .map(RawStatement::into_statement)
            .collect::<Result<Vec<_>, _>>()?;
        let on_expiry = self
            .on_expiry
            .into_iter()
            .map(RawStatement::into_statement)
            .collect::<Result<Vec<_>, _>>()?;
        let on_release = self
            .on_release
            .into_iter()
            .map(RawStatement::into_statement)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Group {
            name: self.name,
            settings: self.settings.into(),
            statements,
            on_commit,
            on_expiry,
            on_release,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawPoolAccess {
    #[serde(default)]
    allow_unknown_clients: bool,
    #[serde(default)]
    deny_known_clients: bool,
    #[serde(default)]
    allow_dynamic_bootp: bool,
}

#[derive(Debug, Deserialize)]
struct RawPool {
    range_start: Ipv4Addr,
    range_end: Ipv4Addr,
    #[serde(default)]
    access: RawPoolAccess,
    #[serde(default)]
    group: RawGroup,
}

impl RawPool {
    fn into_pool(self) -> Result<Pool, ConfigError> {
        Ok(Pool {
            range_start: self.range_start,
            range_end: self.range_end,
            access: PoolAccess {
                allow_unknown_clients: self.access.allow_unknown_clients,
                deny_known_clients: self.access.deny_known_clients,
                allow_dynamic_bootp: self.access.allow_dynamic_bootp,
            },
            group: self.group.into_group()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawSubnet {
    network: Ipv4Addr,
    netmask: Ipv4Addr,
    #[serde(default)]
    group: RawGroup,
}

#[derive(Debug, Deserialize)]
struct RawSharedNetwork {
    name: String,
    subnets: Vec<RawSubnet>,
    #[serde(default)]
    pools: Vec<RawPool>,
    #[serde(default)]
    group: RawGroup,
    #[serde(default)]
    hosts: Vec<RawHost>,
}

#[derive(Debug, Deserialize)]
struct RawHost {
    name: String,
    client_id: Option<ClientId>,
    hardware_addr: Option<RawHardwareAddr>,
    fixed_addr: Option<Ipv4Addr>,
    #[serde(default)]
    group: RawGroup,
}

#[derive(Debug, Deserialize)]
struct RawHardwareAddr {
    htype: u8,
    addr: Vec<u8>,
}

impl RawHost {
    fn into_host(self) -> Result<HostDecl, ConfigError> {
        Ok(HostDecl {
            name: self.name,
            client_id: self.client_id,
            hardware_addr: self
                .hardware_addr
                .and_then(|h| HardwareAddr::new(h.htype, &h.addr)),
            fixed_addr: self.fixed_addr,
            group: self.group.into_group()?,
        })
    }
}

impl RawConfig {
    fn into_config(self) -> Result<Config, ConfigError> {
        let global = self.global.into_group()?;

        let mut shared_networks = Vec::new();
        let mut subnets = Vec::new();
        let mut hosts = Vec::new();

        for raw_net in self.shared_networks {
            let pools = raw_net
                .pools
                .into_iter()
                .map(RawPool::into_pool)
                .collect::<Result<Vec<_>, _>>()?;

            let mut subnet_addrs = Vec::new();
            for raw_subnet in raw_net.subnets {
                subnet_addrs.push(raw_subnet.network);
                subnets.push(Subnet {
                    network: raw_subnet.network,
                    netmask: raw_subnet.netmask,
                    shared_network: raw_net.name.clone(),
                    group: raw_subnet.group.into_group()?,
                });
            }

            for raw_host in raw_net.hosts {
                hosts.push(raw_host.into_host()?);
            }

            shared_networks.push(SharedNetwork {
                name: raw_net.name,
                subnets: subnet_addrs,
                pools,
                group: raw_net.group.into_group()?,
            });
        }

        let classes = self
            .classes
            .into_iter()
            .map(RawClass::into_class)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            global,
            shared_networks,
            subnets,
            hosts,
            classes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
global:
  settings:
    authoritative: true
    default_lease_time: 3600
shared_networks:
  - name: office
    subnets:
      - network: 10.0.0.0
        netmask: 255.255.255.0
    pools:
      - range_start: 10.0.0.100
        range_end: 10.0.0.200
        access:
          allow_unknown_clients: true
    hosts:
      - name: printer
        hardware_addr:
          htype: 1
          addr: [2, 0, 0, 0, 0, 99]
        fixed_addr: 10.0.0.50
"#;

    #[test]
    fn parses_a_minimal_tree() {
        let config = Config::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.global.settings.authoritative, Some(true));
        assert_eq!(config.shared_networks.len(), 1);
        assert_eq!(config.subnets.len(), 1);
        assert!(config.find_subnet_containing(Ipv4Addr::new(10, 0, 0, 5)).is_some());
    }

    #[test]
    fn host_lookup_by_hardware_address_works() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let hw = HardwareAddr::new(1, &[2, 0, 0, 0, 0, 99]).unwrap();

        let host = config.find_host_by_hw(&hw).unwrap();
        assert_eq!(host.name, "printer");
        assert_eq!(host.fixed_addr, Some(Ipv4Addr::new(10, 0, 0, 50)));
    }

    #[test]
    fn on_commit_statements_parse_into_the_group() {
        let text = r#"
global:
  on_commit:
    - universe: dhcp
      code: 1
      op: supersede
      value: 10.0.0.1
"#;
        let config = Config::from_yaml(text).unwrap();
        assert_eq!(config.global.on_commit.len(), 1);
        assert_eq!(config.global.on_commit[0].code, 1);
        assert!(config.global.on_expiry.is_empty());
    }

    #[test]
    fn unknown_universe_name_is_rejected() {
        let bad = r#"
global:
  options:
    - universe: nonsense
      code: 1
      op: supersede
      value: 10.0.0.1
"#;
        assert!(matches!(
            Config::from_yaml(bad),
            Err(ConfigError::UnknownUniverse(_))
        ));
    }
}
