use secrecy::Secret;

/// Key-value secret lookup. The env-var implementation below covers dev and
/// CI; managed secret stores (e.g. AWS Secrets Manager) implement the same
/// trait in their own crate.
pub trait SecretStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Option<Secret<String>>;

    /// Like [`get`], but with a descriptive error for required secrets.
    ///
    /// [`get`]: SecretStore::get
    fn require(&self, key: &str) -> anyhow::Result<Secret<String>> {
        self.get(key)
            .ok_or_else(|| anyhow::anyhow!("Missing required secret '{key}'"))
    }
}

/// Reads secrets from process environment variables.
#[derive(Default)]
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn get(&self, key: &str) -> Option<Secret<String>> {
        std::env::var(key).ok().map(Secret::new)
    }
}

#[cfg(test)]
mod test {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn env_store_reads_and_misses() {
        std::env::set_var("SECRET_STORE_TEST_KEY", "hunter2");
        let store = EnvSecretStore;
        assert_eq!(
            store.get("SECRET_STORE_TEST_KEY").unwrap().expose_secret(),
            "hunter2"
        );
        assert!(store.get("SECRET_STORE_TEST_MISSING").is_none());
        assert!(store.require("SECRET_STORE_TEST_MISSING").is_err());
    }
}
