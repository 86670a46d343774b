mod delivered_alerts;
mod pending_alerts;
