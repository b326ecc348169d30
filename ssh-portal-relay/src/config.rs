use ssh_portal_common::Secret;

#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub receiver_token: Option<Secret<String>>,
    pub sender_token: Option<Secret<String>>,
}

impl RelayConfig {
    fn token_matches(expected: &Option<Secret<String>>, given: &Option<String>) -> bool {
        match expected {
            None => true,
            Some(expected) => given.as_deref() == Some(expected.expose_secret().as_str()),
        }
    }

    pub fn receiver_token_ok(&self, given: &Option<String>) -> bool {
        Self::token_matches(&self.receiver_token, given)
    }

    pub fn sender_token_ok(&self, given: &Option<String>) -> bool {
        Self::token_matches(&self.sender_token, given)
    }
}
