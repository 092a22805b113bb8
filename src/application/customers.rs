use std::sync::Arc;

use tracing::info;

use crate::domain::{Customer, CustomerId, CustomerStatus};
use crate::storage::CustomerStore;

use super::LedgerError;

/// Fields accepted when creating or updating a customer.
#[derive(Debug, Clone)]
pub struct CustomerDetails {
    pub name: String,
    pub city: Option<String>,
    pub zipcode: Option<String>,
    pub status: CustomerStatus,
}

impl CustomerDetails {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            city: None,
            zipcode: None,
            status: CustomerStatus::Active,
        }
    }

    fn validate(&self) -> Result<(), LedgerError> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidCustomer(
                "name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct CustomerDirectory<S> {
    store: Arc<S>,
}

impl<S: CustomerStore> CustomerDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn create_customer(&self, details: CustomerDetails) -> Result<Customer, LedgerError> {
        details.validate()?;

        let mut customer = Customer::new(details.name.trim()).with_status(details.status);
        customer.city = details.city;
        customer.zipcode = details.zipcode;

        self.store.save_customer(&customer).await?;
        info!(customer_id = %customer.id, "customer created");
        Ok(customer)
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Customer, LedgerError> {
        self.store
            .get_customer(id)
            .await?
            .ok_or(LedgerError::CustomerNotFound(id))
    }

    pub async fn list_customers(&self) -> Result<Vec<Customer>, LedgerError> {
        Ok(self.store.list_customers().await?)
    }

    pub async fn update_customer(
        &self,
        id: CustomerId,
        details: CustomerDetails,
    ) -> Result<Customer, LedgerError> {
        details.validate()?;

        let mut customer = self.get_customer(id).await?;
        customer.name = details.name.trim().to_string();
        customer.city = details.city;
        customer.zipcode = details.zipcode;
        customer.status = details.status;

        if !self.store.update_customer(&customer).await? {
            return Err(LedgerError::CustomerNotFound(id));
        }
        Ok(customer)
    }
}
