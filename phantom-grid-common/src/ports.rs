//! Single source of truth for the protected and fake port tables.
//!
//! The kernel-side predicates and the userspace listener both read these
//! arrays, so a deployment can never end up with the hook and the listener
//! disagreeing about which ports exist.

/// Ports belonging to real, sensitive services. Closed to every source that
/// has not authenticated through SPA.
pub const CRITICAL_PORTS: [u16; 59] = [
    22,    // SSH
    3306,  // MySQL
    5432,  // PostgreSQL
    27017, // MongoDB
    6379,  // Redis
    8080,  // Admin panel / HTTP proxy
    8443,  // HTTPS admin panel
    9000,  // Admin panel / Portainer
    3389,  // RDP
    1433,  // MSSQL
    1521,  // Oracle
    5433,  // PostgreSQL alt
    5985,  // WinRM HTTP
    5986,  // WinRM HTTPS
    2375,  // Docker (unencrypted)
    2376,  // Docker (TLS)
    5000,  // Docker registry / Flask
    27018, // MongoDB shard
    9200,  // Elasticsearch
    5601,  // Kibana
    3000,  // Node.js / Grafana
    8000,  // Django / Jupyter
    8888,  // Jupyter
    9090,  // Prometheus
    9091,  // Prometheus pushgateway
    15672, // RabbitMQ management
    8161,  // ActiveMQ web console
    8162,  // ActiveMQ web console (HTTPS)
    61616, // ActiveMQ
    61617, // ActiveMQ (SSL)
    2181,  // Zookeeper
    7001,  // WebLogic
    7002,  // WebLogic (SSL)
    4848,  // GlassFish admin
    4849,  // GlassFish admin (HTTPS)
    9990,  // WildFly admin
    9993,  // WildFly admin (HTTPS)
    5984,  // CouchDB
    2702,  // MSSQL browser
    1434,  // MSSQL monitor
    1527,  // Derby
    50000, // DB2
    50001, // DB2 (SSL)
    1883,  // MQTT
    8883,  // MQTT (SSL)
    61613, // STOMP
    61614, // STOMP (SSL)
    5672,  // RabbitMQ AMQP
    5671,  // RabbitMQ AMQP (SSL)
    4369,  // Erlang port mapper
    25672, // RabbitMQ management (Erlang)
    11211, // Memcached
    11214, // Memcached (SSL)
    389,   // LDAP
    636,   // LDAP (SSL)
    3268,  // LDAP global catalog
    3269,  // LDAP global catalog (SSL)
    2049,  // NFS
    111,   // RPC portmapper
];

/// Ports that only appear open. Any SYN here is reconnaissance and is
/// redirected into the deception server.
pub const FAKE_PORTS: [u16; 24] = [
    80,    // HTTP
    443,   // HTTPS
    3306,  // MySQL
    5432,  // PostgreSQL
    6379,  // Redis
    27017, // MongoDB
    8080,  // Admin panel
    8443,  // HTTPS alt
    9000,  // Admin panel
    21,    // FTP
    23,    // Telnet
    3389,  // RDP
    5900,  // VNC
    1433,  // MSSQL
    1521,  // Oracle
    5433,  // PostgreSQL alt
    11211, // Memcached
    27018, // MongoDB shard
    9200,  // Elasticsearch
    5601,  // Kibana
    3000,  // Node.js
    5000,  // Flask
    8000,  // Django
    8888,  // Jupyter
];

/// Ports tried, in order, when the honeypot port itself cannot be bound.
pub const FALLBACK_PORTS: [u16; 5] = [9998, 9997, 9996, 8888, 7777];

#[inline(always)]
pub fn is_critical_asset_port(port: u16) -> bool {
    let mut i = 0;
    while i < CRITICAL_PORTS.len() {
        if CRITICAL_PORTS[i] == port {
            return true;
        }
        i += 1;
    }
    false
}

#[inline(always)]
pub fn is_fake_port(port: u16) -> bool {
    let mut i = 0;
    while i < FAKE_PORTS.len() {
        if FAKE_PORTS[i] == port {
            return true;
        }
        i += 1;
    }
    false
}
