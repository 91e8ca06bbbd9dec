use rand::Rng;
use rand::distr::Alphanumeric;
use std::str::FromStr;
use tracing::warn;

/// Generate an identifier of the form `<prefix>_<unix millis>_<9 random chars>`.
pub fn generate_id(prefix: &str) -> String {
	let suffix: String = rand::rng()
		.sample_iter(&Alphanumeric)
		.take(9)
		.map(|c| (c as char).to_ascii_lowercase())
		.collect();
	format!(
		"{}_{}_{}",
		prefix,
		chrono::Utc::now().timestamp_millis(),
		suffix
	)
}

/// First eight characters of a wallet address, used for generated usernames.
pub fn short_wallet(wallet: &str) -> &str {
	match wallet.char_indices().nth(8) {
		Some((idx, _)) => &wallet[..idx],
		None => wallet,
	}
}

/// Read an environment variable, falling back to `default` when unset or unparseable.
pub fn env_or<T: FromStr>(name: &str, default: T) -> T {
	match std::env::var(name) {
		Ok(raw) => match raw.trim().parse::<T>() {
			Ok(value) => value,
			Err(_) => {
				warn!("Ignoring unparseable value {:?} for {}", raw, name);
				default
			}
		},
		Err(_) => default,
	}
}
