pub mod data_interface;
pub mod model;
pub mod data_interfaces {
    pub mod data_interface_sqlite;
}
pub mod keygate;
pub mod keygate_error;
pub mod keygate_file;
pub mod plan;
pub mod server;
