//! Integration tests

mod support;
mod test_disk_store;
mod test_ingest;
mod test_relay;
mod test_settings;
mod test_status;
mod test_workflow;
