pub mod inverter;
pub mod packet;
pub mod telemetry;
pub mod transport;
