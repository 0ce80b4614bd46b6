pub mod asset_job;
