//! Banner database for The Mirage: each fake service greets with one of
//! several plausible real-world banners so repeated probes see variety.

use rand::seq::SliceRandom;

use super::ServiceKind;

pub const SSH_BANNERS: [&str; 8] = [
    "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\r\n",
    "SSH-2.0-OpenSSH_7.4 Debian-10+deb9u7\r\n",
    "SSH-2.0-OpenSSH_8.0 FreeBSD-20200214\r\n",
    "SSH-2.0-OpenSSH_7.9 CentOS-7.9\r\n",
    "SSH-2.0-OpenSSH_8.1 RedHat-8.1\r\n",
    "SSH-2.0-OpenSSH_6.7p1 Debian-5+deb8u4\r\n",
    "SSH-2.0-OpenSSH_7.6p1 Ubuntu-4ubuntu0.3\r\n",
    "SSH-2.0-OpenSSH_8.4p1 Arch Linux\r\n",
];

pub const MYSQL_BANNERS: [&str; 3] = [
    "\x0a5.7.35-0ubuntu0.18.04.1\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
    "\x0a8.0.27-0ubuntu0.20.04.1\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
    "\x0a10.3.34-MariaDB-1:10.3.34+maria~focal\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00",
];

pub const REDIS_BANNERS: [&str; 3] = [
    "$6\r\nRedis\r\n",
    "$7\r\nRedis 6.2.6\r\n",
    "$7\r\nRedis 5.0.7\r\n",
];

pub const FTP_BANNERS: [&str; 3] = [
    "220 ProFTPD 1.3.6 Server (ProFTPD Default Installation) [::ffff:192.168.1.1]\r\n",
    "220 (vsFTPd 3.0.3)\r\n",
    "220 Microsoft FTP Service\r\n",
];

pub const TELNET_BANNERS: [&str; 4] = [
    "Welcome to Ubuntu 20.04.3 LTS (GNU/Linux 5.4.0-74-generic x86_64)\r\n\r\n",
    "Red Hat Enterprise Linux Server release 7.9 (Maipo)\r\nKernel 3.10.0-1160.el7.x86_64 on an x86_64\r\n\r\n",
    "CentOS Linux 7 (Core)\r\nKernel 3.10.0-1160.el7.x86_64 on an x86_64\r\n\r\n",
    "Debian GNU/Linux 10\r\n\r\n",
];

/// Pre-session banner for a service. HTTP never speaks first, so it has no
/// banner here; its server header rides on the emulator's responses.
pub fn random_banner(service: ServiceKind) -> &'static str {
    let mut rng = rand::thread_rng();
    match service {
        ServiceKind::Ssh => SSH_BANNERS.choose(&mut rng).copied().unwrap_or(SSH_BANNERS[0]),
        ServiceKind::Mysql => MYSQL_BANNERS.choose(&mut rng).copied().unwrap_or(MYSQL_BANNERS[0]),
        ServiceKind::Redis => REDIS_BANNERS.choose(&mut rng).copied().unwrap_or(REDIS_BANNERS[0]),
        ServiceKind::Ftp => FTP_BANNERS.choose(&mut rng).copied().unwrap_or(FTP_BANNERS[0]),
        ServiceKind::Telnet => {
            TELNET_BANNERS.choose(&mut rng).copied().unwrap_or(TELNET_BANNERS[0])
        }
        ServiceKind::Http => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_banners_look_like_protocol_10_handshakes() {
        for banner in MYSQL_BANNERS {
            assert!(banner.starts_with('\x0a'));
        }
        assert!(MYSQL_BANNERS.iter().any(|b| b.starts_with("\x0a5.7.35-")));
        assert!(MYSQL_BANNERS.iter().any(|b| b.starts_with("\x0a8.0.27-")));
        assert!(MYSQL_BANNERS.iter().any(|b| b.starts_with("\x0a10.3.34-MariaDB-")));
    }

    #[test]
    fn ssh_banners_are_version_exchanges() {
        for banner in SSH_BANNERS {
            assert!(banner.starts_with("SSH-2.0-"));
            assert!(banner.ends_with("\r\n"));
        }
    }

    #[test]
    fn ftp_banners_are_220_greetings() {
        for banner in FTP_BANNERS {
            assert!(banner.starts_with("220"));
        }
    }

    #[test]
    fn http_has_no_pre_session_banner() {
        assert_eq!(random_banner(ServiceKind::Http), "");
    }
}
