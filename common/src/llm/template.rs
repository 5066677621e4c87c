use crate::error::{ChatError, Result};
use crate::llm::model::Message;
use minijinja::{context, Environment, Error, ErrorKind};

/// used when the tokenizer config does not ship a template
pub const CHATML_TEMPLATE: &str = "{% for message in messages %}\
{{ '<|im_start|>' + message['role'] + '\\n' + message['content'] + '<|im_end|>' + '\\n' }}\
{% endfor %}\
{% if add_generation_prompt %}{{ '<|im_start|>assistant\\n' }}{% endif %}";

/// a jinja chat template plus the special tokens it may reference
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    source: String,
    bos_token: String,
    eos_token: String,
}

fn raise_exception(msg: String) -> std::result::Result<String, Error> {
    Err(Error::new(ErrorKind::InvalidOperation, msg))
}

impl ChatTemplate {
    pub fn new(source: impl Into<String>, bos_token: impl Into<String>, eos_token: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            bos_token: bos_token.into(),
            eos_token: eos_token.into(),
        }
    }

    pub fn chatml() -> Self {
        Self::new(CHATML_TEMPLATE, "", "<|im_end|>")
    }

    pub fn render(&self, messages: &[Message]) -> Result<String> {
        let mut env = Environment::new();
        env.add_function("raise_exception", raise_exception);

        let template = env
            .template_from_str(&self.source)
            .map_err(|e| ChatError::Template(e.to_string()))?;

        template
            .render(context! {
                messages => messages,
                add_generation_prompt => true,
                bos_token => &self.bos_token,
                eos_token => &self.eos_token,
            })
            .map_err(|e| ChatError::Template(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chatml_render() {
        let prompt = ChatTemplate::chatml()
            .render(&[Message::user("hi"), Message::assistant("hello"), Message::user("bye")])
            .unwrap();
        assert_eq!(
            prompt,
            "<|im_start|>user\nhi<|im_end|>\n\
             <|im_start|>assistant\nhello<|im_end|>\n\
             <|im_start|>user\nbye<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn test_template_special_tokens_and_exceptions() {
        let template = ChatTemplate::new(
            "{{ bos_token }}{% for m in messages %}{% if m.role == 'system' %}{{ raise_exception('no system') }}{% endif %}{{ m.content }}{% endfor %}{{ eos_token }}",
            "<s>",
            "</s>",
        );
        assert_eq!(template.render(&[Message::user("x")]).unwrap(), "<s>x</s>");

        let err = template.render(&[Message::system("x")]).unwrap_err();
        assert!(matches!(err, ChatError::Template(msg) if msg.contains("no system")));
    }
}
