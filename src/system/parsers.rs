//! Parsers for the output of the wireless and link tools.
//!
//! All functions are pure so they can be tested against captured output.

use regex::Regex;
use serde::Serialize;
use std::{sync::LazyLock, time::Duration};

static STATION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Station\s+([0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5})\s+\(on\s+(\S+)\)")
        .expect("invalid station header regex")
});

static ESSID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"ESSID:"(.*)""#).expect("invalid ESSID regex"));

static LINK_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+:\s+([^:@\s]+)(?:@\S+)?:\s+<([^>]*)>.*?\sstate\s+(\S+)")
        .expect("invalid link regex")
});

/// A station associated with the access point
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedClient {
    pub mac_address: String,
    pub rx_bitrate: Option<String>,
    pub tx_bitrate: Option<String>,
    pub signal_dbm: Option<i32>,
    pub authorized: bool,
    pub authenticated: bool,
    pub connected_time: Option<Duration>,
}

/// One row of `wpa_cli list_networks`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListedNetwork {
    pub id: u32,
    pub ssid: String,
    pub bssid: String,
    pub flags: Vec<String>,
}

/// Link flags and operational state as reported by `ip -o link show`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkState {
    pub name: String,
    pub flags: Vec<String>,
    pub oper_state: String,
}

impl LinkState {
    /// Virtual links often report `UNKNOWN`; fall back to the admin flag then.
    pub fn is_up(&self) -> bool {
        match self.oper_state.as_str() {
            "UP" => true,
            "UNKNOWN" => self.flags.iter().any(|f| f == "UP"),
            _ => false,
        }
    }
}

/// Parse `iw dev <iface> station dump`
///
/// Only stations reported on `iface` are returned.
pub fn parse_station_dump(output: &str, iface: &str) -> Vec<ConnectedClient> {
    let mut clients = Vec::new();
    let mut current: Option<ConnectedClient> = None;

    for line in output.lines() {
        if let Some(caps) = STATION_HEADER.captures(line.trim_start()) {
            clients.extend(current.take());

            if &caps[2] == iface {
                current = Some(ConnectedClient {
                    mac_address: caps[1].to_ascii_lowercase(),
                    ..Default::default()
                });
            }
            continue;
        }

        let Some(client) = current.as_mut() else {
            continue;
        };

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match key.trim() {
            "rx bitrate" => client.rx_bitrate = Some(value.to_string()),
            "tx bitrate" => client.tx_bitrate = Some(value.to_string()),
            "signal" => {
                client.signal_dbm = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
            }
            "authorized" => client.authorized = value == "yes",
            "authenticated" => client.authenticated = value == "yes",
            "connected time" => {
                client.connected_time = value
                    .trim_end_matches("seconds")
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .map(Duration::from_secs)
            }
            _ => {}
        }
    }

    clients.extend(current);
    clients
}

/// Parse the SSIDs out of `iwlist <iface> scan`, hidden networks skipped
pub fn parse_scan_ssids(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| ESSID.captures(line))
        .map(|caps| caps[1].to_string())
        .filter(|ssid| !ssid.is_empty())
        .collect()
}

/// Parse `wpa_cli list_networks`
pub fn parse_network_list(output: &str) -> Vec<ListedNetwork> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split('\t');
            let id = columns.next()?.trim().parse::<u32>().ok()?;
            let ssid = columns.next()?.to_string();
            let bssid = columns.next().unwrap_or_default().to_string();
            let flags = columns
                .next()
                .unwrap_or_default()
                .split(['[', ']'])
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect();

            Some(ListedNetwork {
                id,
                ssid,
                bssid,
                flags,
            })
        })
        .collect()
}

/// Parse the first link of `ip -o link show <iface>`
pub fn parse_link_state(output: &str) -> Option<LinkState> {
    output.lines().find_map(|line| {
        let caps = LINK_LINE.captures(line)?;
        Some(LinkState {
            name: caps[1].to_string(),
            flags: caps[2].split(',').map(String::from).collect(),
            oper_state: caps[3].to_string(),
        })
    })
}

/// Parse `iwgetid -r`, one SSID per line
pub fn parse_connected_ssids(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_DUMP: &str = "Station b8:27:eb:12:34:56 (on ap0)
\tinactive time:\t304 ms
\trx bytes:\t18816
\trx packets:\t173
\ttx bytes:\t5750
\ttx packets:\t42
\ttx retries:\t0
\ttx failed:\t0
\tsignal:  \t-39 [-39] dBm
\ttx bitrate:\t65.0 MBit/s MCS 7
\trx bitrate:\t1.0 MBit/s
\tauthorized:\tyes
\tauthenticated:\tyes
\tassociated:\tyes
\tpreamble:\tlong
\tWMM/WME:\tyes
\tMFP:\t\tno
\tTDLS peer:\tno
\tconnected time:\t26 seconds
Station DC:A6:32:AB:CD:EF (on ap0)
\tinactive time:\t1200 ms
\tsignal:  \t-61 [-61] dBm
\ttx bitrate:\t1.0 MBit/s
\trx bitrate:\t6.0 MBit/s
\tauthorized:\tno
\tauthenticated:\tyes
\tconnected time:\t3 seconds
";

    const IWLIST_SCAN: &str = r#"wlan0     Scan completed :
          Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=70/70  Signal level=-34 dBm
                    Encryption key:on
                    ESSID:"MyNetwork1"
          Cell 02 - Address: 66:77:88:99:AA:BB
                    Channel:11
                    ESSID:""
          Cell 03 - Address: CC:DD:EE:FF:00:11
                    Channel:1
                    ESSID:"MyNetwork2"
"#;

    const LIST_NETWORKS: &str = "Selected interface 'wlan0'
network id / ssid / bssid / flags
0\thome\tany\t[CURRENT]
1\toffice\tany\t[DISABLED]
2\tguest wifi\tany\t
";

    mod station_dump {
        use super::*;

        #[test]
        fn parses_all_stations_on_interface() {
            let clients = parse_station_dump(STATION_DUMP, "ap0");

            assert_eq!(clients.len(), 2);

            let first = &clients[0];
            assert_eq!(first.mac_address, "b8:27:eb:12:34:56");
            assert_eq!(first.tx_bitrate.as_deref(), Some("65.0 MBit/s MCS 7"));
            assert_eq!(first.rx_bitrate.as_deref(), Some("1.0 MBit/s"));
            assert_eq!(first.signal_dbm, Some(-39));
            assert!(first.authorized);
            assert!(first.authenticated);
            assert_eq!(first.connected_time, Some(Duration::from_secs(26)));

            let second = &clients[1];
            assert_eq!(second.mac_address, "dc:a6:32:ab:cd:ef");
            assert!(!second.authorized);
            assert_eq!(second.connected_time, Some(Duration::from_secs(3)));
        }

        #[test]
        fn ignores_stations_on_other_interfaces() {
            assert!(parse_station_dump(STATION_DUMP, "wlan1").is_empty());
        }

        #[test]
        fn empty_output_yields_no_clients() {
            assert!(parse_station_dump("", "ap0").is_empty());
        }
    }

    #[test]
    fn scan_skips_hidden_networks() {
        assert_eq!(parse_scan_ssids(IWLIST_SCAN), vec!["MyNetwork1", "MyNetwork2"]);
    }

    #[test]
    fn network_list_parses_rows_and_flags() {
        let networks = parse_network_list(LIST_NETWORKS);

        assert_eq!(networks.len(), 3);
        assert_eq!(networks[0].id, 0);
        assert_eq!(networks[0].ssid, "home");
        assert_eq!(networks[0].flags, vec!["CURRENT"]);
        assert_eq!(networks[1].flags, vec!["DISABLED"]);
        assert_eq!(networks[2].ssid, "guest wifi");
        assert!(networks[2].flags.is_empty());
    }

    mod link_state {
        use super::*;

        #[test]
        fn parses_up_link() {
            let output = "3: wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc pfifo_fast state UP mode DORMANT group default qlen 1000\\    link/ether b8:27:eb:00:00:01 brd ff:ff:ff:ff:ff:ff";
            let state = parse_link_state(output).expect("should parse");

            assert_eq!(state.name, "wlan0");
            assert_eq!(state.oper_state, "UP");
            assert!(state.is_up());
        }

        #[test]
        fn parses_down_link() {
            let output = "3: wlan0: <BROADCAST,MULTICAST> mtu 1500 qdisc pfifo_fast state DOWN mode DEFAULT group default qlen 1000\\    link/ether b8:27:eb:00:00:01 brd ff:ff:ff:ff:ff:ff";
            let state = parse_link_state(output).expect("should parse");

            assert!(!state.is_up());
        }

        #[test]
        fn unknown_state_uses_admin_flag() {
            let output = "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN mode DEFAULT group default qlen 1000\\    link/loopback 00:00:00:00:00:00 brd 00:00:00:00:00:00";
            assert!(parse_link_state(output).expect("should parse").is_up());
        }

        #[test]
        fn strips_parent_suffix() {
            let output = "7: ap0@wlan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP mode DEFAULT group default";
            assert_eq!(parse_link_state(output).expect("should parse").name, "ap0");
        }

        #[test]
        fn garbage_yields_none() {
            assert_eq!(parse_link_state("Device \"wlan9\" does not exist."), None);
        }
    }

    #[test]
    fn connected_ssids_skip_blank_lines() {
        assert_eq!(parse_connected_ssids("testssid\n\n"), vec!["testssid"]);
    }
}
