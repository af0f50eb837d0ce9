pub mod queue_service_errors;
