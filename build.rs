//! Build script for compile-time configuration injection.
//!
//! Set environment variables before building to configure the firmware:
//!
//!   NODE_ID=0x102 \
//!   WIFI_SSID=MyWiFi \
//!   WIFI_PASSWORD=secret123 \
//!   HTTP_SERVER_IP=192.168.1.68 \
//!   HTTP_SERVER_PORT=3000 \
//!   cargo build --release
//!
//! `NODE_ID` is optional. Without it the node keeps the identity stored in
//! flash (0x101 on a fresh board).

fn main() {
    // Re-run build script if these environment variables change
    println!("cargo::rerun-if-env-changed=NODE_ID");
    println!("cargo::rerun-if-env-changed=WIFI_SSID");
    println!("cargo::rerun-if-env-changed=WIFI_PASSWORD");
    println!("cargo::rerun-if-env-changed=HTTP_SERVER_IP");
    println!("cargo::rerun-if-env-changed=HTTP_SERVER_PORT");
}
