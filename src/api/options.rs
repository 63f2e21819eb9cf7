use std::convert::TryFrom;

/// Tuning knobs for a coordinator. Anything left `None` gets a default.
#[derive(Clone, Debug, Default)]
pub struct CoordinatorOptions {
    /// Capacity of the global client request queue.
    pub request_queue_capacity: Option<usize>,
    /// Capacity of each storage node's mailbox. A full mailbox answers `unavailable`.
    pub mailbox_capacity: Option<usize>,
    pub membership_queue_capacity: Option<usize>,
    /// Largest frame accepted from a storage node, in bytes.
    pub max_frame_length: Option<usize>,
}

pub(super) struct CoordinatorOptionsValidated {
    pub request_queue_capacity: usize,
    pub mailbox_capacity: usize,
    pub membership_queue_capacity: usize,
    pub max_frame_length: usize,
}

impl CoordinatorOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.request_queue_capacity == 0 {
            return Err("Request queue capacity must be greater than 0");
        }
        if self.mailbox_capacity == 0 {
            return Err("Mailbox capacity must be greater than 0");
        }
        if self.membership_queue_capacity == 0 {
            return Err("Membership queue capacity must be greater than 0");
        }
        if self.max_frame_length == 0 {
            return Err("Max frame length must be greater than 0");
        }

        Ok(())
    }
}

impl TryFrom<CoordinatorOptions> for CoordinatorOptionsValidated {
    type Error = &'static str;

    fn try_from(options: CoordinatorOptions) -> Result<Self, Self::Error> {
        let values = CoordinatorOptionsValidated {
            request_queue_capacity: options.request_queue_capacity.unwrap_or(10_000),
            mailbox_capacity: options.mailbox_capacity.unwrap_or(1000),
            membership_queue_capacity: options.membership_queue_capacity.unwrap_or(1000),
            max_frame_length: options.max_frame_length.unwrap_or(16 * 1024 * 1024),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_options_get_defaults() {
        let validated = CoordinatorOptionsValidated::try_from(CoordinatorOptions::default()).unwrap();

        assert_eq!(validated.request_queue_capacity, 10_000);
        assert_eq!(validated.mailbox_capacity, 1000);
        assert_eq!(validated.membership_queue_capacity, 1000);
        assert_eq!(validated.max_frame_length, 16 * 1024 * 1024);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let options = CoordinatorOptions {
            mailbox_capacity: Some(0),
            ..CoordinatorOptions::default()
        };

        assert!(CoordinatorOptionsValidated::try_from(options).is_err());
    }
}
