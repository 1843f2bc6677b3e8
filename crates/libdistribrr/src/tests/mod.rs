mod e2e_agent;
