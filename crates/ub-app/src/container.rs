//! Composition root
//!
//! Built once the broker is started (it needs both vhost handles) and shared
//! as `Arc<Container>` with consumers, jobs, admin commands and HTTP handlers.

use std::sync::Arc;

use ub_broker::VirtualHost;

use crate::amqp::Producers;
use crate::integrations::JsonPlaceholderClient;
use crate::repository::UserRepository;
use crate::services::UserService;

pub struct Container {
    pub repository: Arc<dyn UserRepository>,
    pub json_placeholder: Arc<JsonPlaceholderClient>,
    pub home_vhost: Arc<VirtualHost>,
    pub work_vhost: Arc<VirtualHost>,
    pub producers: Producers,
    pub user_service: UserService,
}

impl Container {
    pub fn new(
        repository: Arc<dyn UserRepository>,
        json_placeholder: JsonPlaceholderClient,
        home_vhost: Arc<VirtualHost>,
        work_vhost: Arc<VirtualHost>,
    ) -> Self {
        let json_placeholder = Arc::new(json_placeholder);
        let producers = Producers::new(home_vhost.clone(), work_vhost.clone());
        let user_service = UserService::new(repository.clone(), json_placeholder.clone(), producers.clone());

        Self {
            repository,
            json_placeholder,
            home_vhost,
            work_vhost,
            producers,
            user_service,
        }
    }
}
