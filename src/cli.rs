use clap::Parser;
use std::{env, path::PathBuf};

#[derive(Parser, Debug, Clone)]
#[command(version = env!("CARGO_PKG_VERSION"),
          about = env!("CARGO_PKG_NAME"),
          long_about = "Tails a directory of PostgreSQL csv server logs and loads \
                        them into the pgaudit audit schema"
        )]
pub struct CliArguments {
	/// directory containing the csv server logs to tail
	pub log_path: PathBuf,

	/// detach from the terminal and run in the background
	#[arg(long)]
	pub daemon: bool,

	/// database port
	#[arg(long, default_value_t = 5432)]
	pub port: u16,

	/// socket directory or default host
	#[arg(long, default_value = "/var/run/postgresql")]
	pub socket_path: String,

	/// the daemon's own log file (daemon mode)
	#[arg(long, default_value = "/var/log/pgaudit_ingest.log")]
	pub log_file: PathBuf,

	/// database user. Defaults to the invoking OS user
	#[arg(long)]
	pub user: Option<String>,

	/// host of the central logging server. Enables logging-server mode
	#[arg(long)]
	pub log_server: Option<String>,

	/// database name on the logging server
	#[arg(long, default_value = "pgaudit")]
	pub log_database: String,

	/// port of the logging server
	#[arg(long, default_value_t = 5432)]
	pub log_port: u16,

	/// source server name used when naming schemas on the logging server
	#[arg(long)]
	pub log_from_server: Option<String>,

	/// reserved; has no effect
	#[arg(long = "use-centeral-server")]
	pub use_centeral_server: bool,
}

impl CliArguments {
	pub fn logging_server(&self) -> bool {
		self.log_server.is_some()
	}

	pub fn database_user(&self) -> String {
		self.user
			.clone()
			.unwrap_or_else(|| env::var("USER").unwrap_or_else(|_| String::from("postgres")))
	}

	pub fn connect_host(&self) -> &str {
		self.log_server.as_deref().unwrap_or(&self.socket_path)
	}

	pub fn connect_port(&self) -> u16 {
		if self.logging_server() {
			self.log_port
		} else {
			self.port
		}
	}

	/// Database to connect to for rows from `database`. In logging-server
	/// mode every source database lands in the one central database.
	pub fn connect_dbname<'a>(&'a self, database: &'a str) -> &'a str {
		if self.logging_server() {
			&self.log_database
		} else {
			database
		}
	}

	/// Audit schema name for rows from `database`. On a logging server each
	/// source server's databases get their own namespace; the source name
	/// falls back to the socket path when --log-from-server is not given.
	pub fn schema_name(&self, database: &str) -> String {
		if self.logging_server() {
			let source = self.log_from_server.as_deref().unwrap_or(&self.socket_path);
			format!("{}_{}", source, database)
		} else {
			String::from("pgaudit")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(args: &[&str]) -> CliArguments {
		CliArguments::try_parse_from(args).unwrap()
	}

	#[test]
	fn test_single_server_defaults() {
		let args = parse(&["pgaudit_ingest", "/var/log/postgresql"]);

		assert!(!args.logging_server());
		assert_eq!(args.schema_name("appdb"), "pgaudit");
		assert_eq!(args.connect_dbname("appdb"), "appdb");
		assert_eq!(args.connect_host(), "/var/run/postgresql");
		assert_eq!(args.connect_port(), 5432);
	}

	#[test]
	fn test_logging_server_schema_naming() {
		let args = parse(&[
			"pgaudit_ingest",
			"/var/log/postgresql",
			"--log-server",
			"logs.example.com",
			"--log-from-server",
			"db01",
			"--log-port",
			"5433",
		]);

		assert!(args.logging_server());
		assert_eq!(args.schema_name("appdb"), "db01_appdb");
		assert_eq!(args.connect_dbname("appdb"), "pgaudit");
		assert_eq!(args.connect_host(), "logs.example.com");
		assert_eq!(args.connect_port(), 5433);
	}

	#[test]
	fn test_schema_name_falls_back_to_socket_path() {
		let args = parse(&[
			"pgaudit_ingest",
			"/var/log/postgresql",
			"--log-server",
			"logs.example.com",
			"--socket-path",
			"db02",
		]);

		assert_eq!(args.schema_name("appdb"), "db02_appdb");
	}
}
