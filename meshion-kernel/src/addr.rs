use crate::models::{DeviceInfo, ExtAddr, Rloc16, ServiceRoleFlags};
use std::net::Ipv6Addr;

pub fn is_hex_string(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn parse_ext_addr(s: &str) -> Result<ExtAddr, &'static str> {
    if s.len() != 16 {
        return Err("bad ext addr len");
    }
    let mut out = [0u8; 8];
    for i in 0..8 {
        let byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| "bad ext addr hex")?;
        out[i] = byte;
    }
    Ok(ExtAddr(out))
}

pub fn parse_rloc16(s: &str) -> Result<Rloc16, &'static str> {
    if s.len() != 4 {
        return Err("bad rloc16 len");
    }
    u16::from_str_radix(s, 16).map_err(|_| "bad rloc16 hex")
}

/// Concatène le préfixe mesh-local (64 bits) et un IID (64 bits)
pub fn combine_prefix_and_iid(prefix: &[u8; 8], iid: &ExtAddr) -> Ipv6Addr {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(prefix);
    bytes[8..].copy_from_slice(&iid.0);
    Ipv6Addr::from(bytes)
}

/// Remplace les 16 derniers bits d'une adresse RLOC par le rloc16 voulu
pub fn rloc_address_for(base: Ipv6Addr, rloc16: Rloc16) -> Ipv6Addr {
    let mut bytes = base.octets();
    bytes[14] = (rloc16 >> 8) as u8;
    bytes[15] = (rloc16 & 0xff) as u8;
    Ipv6Addr::from(bytes)
}

/// Adresse de forme RLOC/ALOC : octets 8..14 == 00 00 00 FF FE 00
pub fn is_rloc_or_aloc(addr: &Ipv6Addr) -> bool {
    let b = addr.octets();
    b[8] == 0 && b[9] == 0 && b[10] == 0 && b[11] == 0xff && b[12] == 0xfe && b[13] == 0
}

fn is_link_local(addr: &Ipv6Addr) -> bool {
    let b = addr.octets();
    // fe80::/10
    b[0] == 0xfe && (b[1] & 0xc0) == 0x80
}

fn is_realm_multicast(addr: &Ipv6Addr) -> bool {
    let b = addr.octets();
    // ff00::/8 .. ff0f::/8
    b[0] == 0xff && b[1] <= 0x0f
}

/// Classe une adresse IPv6 rapportée pour un device :
/// - RLOC/ALOC ignorée
/// - préfixe mesh-local -> les 64 bits bas deviennent le MLEID-IID
/// - sinon, ni link-local ni multicast -> adresse OMR (la dernière gagne)
pub fn classify_device_ip6(info: &mut DeviceInfo, addr: &Ipv6Addr, ml_prefix: &[u8; 8]) {
    if is_rloc_or_aloc(addr) {
        return;
    }

    let bytes = addr.octets();
    if &bytes[..8] == ml_prefix {
        let mut iid = [0u8; 8];
        iid.copy_from_slice(&bytes[8..]);
        info.ml_eid_iid = ExtAddr(iid);
    } else if !is_link_local(addr) && !is_realm_multicast(addr) {
        info.omr_ipv6 = Some(*addr);
    }
}

/// Dérive les drapeaux de rôle de service depuis la liste d'adresses d'un device.
/// Les ALOC sont de la forme ...:00ff:fe00:fcXX :
/// - fc00 leader, fc38 BBR primaire, fc10..fc2f héberge un service.
/// `is_border_router` est fourni par l'appelant (présence du rloc16 dans la
/// network data locale).
pub fn service_role_flags(addrs: &[Ipv6Addr], is_border_router: bool) -> ServiceRoleFlags {
    let mut flags = ServiceRoleFlags {
        is_border_router,
        ..Default::default()
    };

    for addr in addrs {
        if !is_rloc_or_aloc(addr) {
            continue;
        }
        let b = addr.octets();
        let aloc = u16::from(b[14]) << 8 | u16::from(b[15]);

        flags.is_leader |= aloc == 0xfc00;
        flags.is_primary_bbr |= aloc == 0xfc38;
        flags.hosts_service |= (0xfc10..=0xfc2f).contains(&aloc);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    const ML_PREFIX: [u8; 8] = [0xfd, 0x11, 0x22, 0x00, 0x00, 0x00, 0x00, 0x01];

    #[test]
    fn test_parse_ext_addr() {
        let a = parse_ext_addr("aabbccddeeff0011").unwrap();
        assert_eq!(a.0, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0x00, 0x11]);
        assert!(parse_ext_addr("aabb").is_err());
        assert!(parse_ext_addr("zzbbccddeeff0011").is_err());
    }

    #[test]
    fn test_parse_rloc16() {
        assert_eq!(parse_rloc16("0800").unwrap(), 0x0800);
        assert!(parse_rloc16("08000").is_err());
        assert!(parse_rloc16("08zz").is_err());
    }

    #[test]
    fn test_combine_prefix_and_iid() {
        let iid = parse_ext_addr("0000000000000077").unwrap();
        let addr = combine_prefix_and_iid(&ML_PREFIX, &iid);
        assert_eq!(addr.octets()[..8], ML_PREFIX);
        assert_eq!(addr.octets()[15], 0x77);
    }

    #[test]
    fn test_rloc_address_for() {
        let base: Ipv6Addr = "fd11:2200::ff:fe00:1c00".parse().unwrap();
        let addr = rloc_address_for(base, 0x0801);
        assert_eq!(addr.octets()[14], 0x08);
        assert_eq!(addr.octets()[15], 0x01);
    }

    #[test]
    fn test_classify_device_ip6() {
        let mut info = DeviceInfo::default();

        // l'adresse RLOC est ignorée
        let rloc: Ipv6Addr = "fd11:2200:0:1:0:ff:fe00:800".parse().unwrap();
        classify_device_ip6(&mut info, &rloc, &ML_PREFIX);
        assert!(info.ml_eid_iid.is_empty());
        assert!(info.omr_ipv6.is_none());

        // préfixe mesh-local -> MLEID-IID
        let mleid: Ipv6Addr = "fd11:2200:0:1::77".parse().unwrap();
        classify_device_ip6(&mut info, &mleid, &ML_PREFIX);
        assert_eq!(info.ml_eid_iid.to_hex(), "0000000000000077");

        // link-local et multicast ne deviennent jamais l'OMR
        let ll: Ipv6Addr = "fe80::2".parse().unwrap();
        classify_device_ip6(&mut info, &ll, &ML_PREFIX);
        assert!(info.omr_ipv6.is_none());
        let mc: Ipv6Addr = "ff02::1".parse().unwrap();
        classify_device_ip6(&mut info, &mc, &ML_PREFIX);
        assert!(info.omr_ipv6.is_none());

        // une globale hors mesh devient l'OMR
        let omr: Ipv6Addr = "fd00:abcd::1".parse().unwrap();
        classify_device_ip6(&mut info, &omr, &ML_PREFIX);
        assert_eq!(info.omr_ipv6, Some(omr));
    }

    #[test]
    fn test_service_role_flags() {
        let leader: Ipv6Addr = "fd11:2200:0:1:0:ff:fe00:fc00".parse().unwrap();
        let bbr: Ipv6Addr = "fd11:2200:0:1:0:ff:fe00:fc38".parse().unwrap();
        let service: Ipv6Addr = "fd11:2200:0:1:0:ff:fe00:fc10".parse().unwrap();
        let plain: Ipv6Addr = "fd00::1".parse().unwrap();

        let flags = service_role_flags(&[leader, plain], false);
        assert!(flags.is_leader);
        assert!(!flags.is_primary_bbr);
        assert!(!flags.is_border_router);

        let flags = service_role_flags(&[bbr, service], true);
        assert!(flags.is_primary_bbr);
        assert!(flags.hosts_service);
        assert!(flags.is_border_router);
        assert!(!flags.is_leader);
    }
}
