mod admission_webhook;
mod exec_authorization;
